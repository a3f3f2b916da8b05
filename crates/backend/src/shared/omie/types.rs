//! Raw Omie record shapes.
//!
//! Deserialization is permissive on purpose: only identity fields are
//! required, everything else defaults, and unknown keys are kept in the
//! `extra` bag so upstream additions never break a sync.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OmieCliente {
    pub codigo_cliente_omie: i64,
    pub razao_social: String,
    #[serde(default)]
    pub codigo_cliente_integracao: String,
    #[serde(default)]
    pub nome_fantasia: String,
    #[serde(default)]
    pub cnpj_cpf: String,
    #[serde(default)]
    pub cidade: String,
    #[serde(default)]
    pub estado: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub telefone1_numero: String,
    #[serde(default)]
    pub inativo: String,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OmieContaCorrente {
    #[serde(rename = "nCodCC")]
    pub n_cod_cc: i64,
    #[serde(default)]
    pub descricao: String,
    #[serde(default)]
    pub tipo_conta_corrente: String,
    #[serde(default)]
    pub codigo_banco: String,
    #[serde(default)]
    pub codigo_agencia: String,
    #[serde(default)]
    pub numero_conta_corrente: String,
    #[serde(default)]
    pub inativo: String,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OmieDepartamento {
    pub codigo: String,
    #[serde(default)]
    pub descricao: String,
    #[serde(default)]
    pub inativo: String,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OmieCategoria {
    pub codigo: String,
    #[serde(default)]
    pub descricao: String,
    #[serde(default)]
    pub descricao_padrao: String,
    #[serde(default)]
    pub conta_inativa: String,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OmieVendedor {
    pub codigo: i64,
    #[serde(default)]
    pub nome: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub inativo: String,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// A receivable title from `ListarContasReceber`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OmieContaReceber {
    pub codigo_lancamento_omie: i64,
    pub codigo_cliente_fornecedor: i64,
    #[serde(default)]
    pub codigo_lancamento_integracao: String,
    #[serde(default)]
    pub codigo_categoria: String,
    #[serde(default)]
    pub data_emissao: String,
    #[serde(default)]
    pub data_vencimento: String,
    #[serde(default)]
    pub data_previsao: String,
    #[serde(default)]
    pub data_registro: String,
    #[serde(default)]
    pub valor_documento: f64,
    #[serde(default)]
    pub status_titulo: String,
    #[serde(default)]
    pub numero_documento: String,
    #[serde(default)]
    pub numero_parcela: String,
    #[serde(default)]
    pub id_conta_corrente: Option<i64>,
    #[serde(default)]
    pub codigo_vendedor: Option<i64>,
    #[serde(default)]
    pub observacao: String,
    #[serde(default)]
    pub distribuicao: Vec<OmieDistribuicao>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OmieDistribuicao {
    #[serde(rename = "cCodDep", default)]
    pub codigo_departamento: Option<String>,
    #[serde(rename = "nPerDep", default)]
    pub percentual: Option<f64>,
    #[serde(rename = "nValDep", default)]
    pub valor: Option<f64>,
}

/// A financial movement from `PesquisarLancamentos` (mf endpoint). The
/// payload nests identity under `detalhes` and amounts under `resumo`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OmieMovimento {
    #[serde(default)]
    pub detalhes: MovimentoDetalhes,
    #[serde(default)]
    pub resumo: MovimentoResumo,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MovimentoDetalhes {
    #[serde(rename = "nCodTitulo", default)]
    pub n_cod_titulo: Option<i64>,
    #[serde(rename = "nCodCliente", default)]
    pub n_cod_cliente: Option<i64>,
    #[serde(rename = "nCodCC", default)]
    pub n_cod_cc: Option<i64>,
    #[serde(rename = "cNatureza", default)]
    pub natureza: String,
    #[serde(rename = "dDtPagamento", default)]
    pub data_pagamento: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MovimentoResumo {
    #[serde(rename = "nValPago", default)]
    pub valor_pago: f64,
    #[serde(rename = "nDesconto", default)]
    pub desconto: f64,
    #[serde(rename = "nJuros", default)]
    pub juros: f64,
    #[serde(rename = "nMulta", default)]
    pub multa: f64,
    #[serde(rename = "cLiquidado", default)]
    pub liquidado: String,
}

/// One bank statement line from `ObterExtrato`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OmieExtratoMovimento {
    #[serde(rename = "nCodMovCC")]
    pub n_cod_mov_cc: i64,
    #[serde(rename = "dDtMovimento", default)]
    pub data_movimento: String,
    #[serde(rename = "cDescricao", default)]
    pub descricao: String,
    #[serde(rename = "cTipo", default)]
    pub tipo: String,
    #[serde(rename = "nValorMovimento", default)]
    pub valor: f64,
    #[serde(rename = "nSaldo", default)]
    pub saldo: Option<f64>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

pub struct ParsedBatch<T> {
    pub valid: Vec<T>,
    pub dropped: usize,
}

/// Deserialize a raw record batch, silently dropping rows that fail the
/// permissive schema. The sync proceeds with whatever survived.
pub fn parse_many<T: DeserializeOwned>(raw: Vec<Value>) -> ParsedBatch<T> {
    let mut valid = Vec::with_capacity(raw.len());
    let mut dropped = 0usize;

    for record in raw {
        match serde_json::from_value::<T>(record) {
            Ok(parsed) => valid.push(parsed),
            Err(e) => {
                dropped += 1;
                tracing::debug!("Dropping malformed record: {}", e);
            }
        }
    }

    if dropped > 0 {
        tracing::warn!("Schema validation dropped {} record(s)", dropped);
    }
    ParsedBatch { valid, dropped }
}

/// Omie dates are `dd/mm/yyyy`; empty or malformed values become None.
pub fn parse_omie_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%d/%m/%Y").ok()
}

pub fn format_omie_date(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}

/// Omie flags inactivity with `"S"`; anything else counts as active.
pub fn is_ativo(inativo: &str) -> bool {
    !inativo.eq_ignore_ascii_case("S")
}

pub fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_many_drops_malformed_rows() {
        let mut raw: Vec<Value> = (0..8)
            .map(|i| json!({"codigo_cliente_omie": i, "razao_social": format!("Empresa {i}")}))
            .collect();
        raw.push(json!({"razao_social": "sem codigo"}));
        raw.push(json!({"codigo_cliente_omie": "not-a-number", "razao_social": "x"}));

        let batch = parse_many::<OmieCliente>(raw);
        assert_eq!(batch.valid.len(), 8);
        assert_eq!(batch.dropped, 2);
    }

    #[test]
    fn test_unknown_fields_survive_in_extra() {
        let raw = json!({
            "codigo_cliente_omie": 10,
            "razao_social": "ACME",
            "tags": [{"tag": "vip"}],
        });
        let cliente: OmieCliente = serde_json::from_value(raw).unwrap();
        assert_eq!(cliente.extra["tags"][0]["tag"], "vip");
    }

    #[test]
    fn test_movimento_parses_nested_payload() {
        let raw = json!({
            "detalhes": {
                "nCodTitulo": 987,
                "cNatureza": "REC",
                "dDtPagamento": "05/03/2026",
            },
            "resumo": {
                "nValPago": 150.5,
                "nJuros": 2.0,
                "cLiquidado": "S",
            },
        });
        let mov: OmieMovimento = serde_json::from_value(raw).unwrap();
        assert_eq!(mov.detalhes.n_cod_titulo, Some(987));
        assert_eq!(mov.detalhes.natureza, "REC");
        assert_eq!(mov.resumo.valor_pago, 150.5);
        assert_eq!(mov.resumo.liquidado, "S");
        assert_eq!(mov.resumo.desconto, 0.0);
    }

    #[test]
    fn test_parse_omie_date() {
        assert_eq!(
            parse_omie_date("25/12/2025"),
            NaiveDate::from_ymd_opt(2025, 12, 25)
        );
        assert_eq!(parse_omie_date(""), None);
        assert_eq!(parse_omie_date("2025-12-25"), None);
        assert_eq!(parse_omie_date("31/02/2025"), None);
    }

    #[test]
    fn test_is_ativo() {
        assert!(is_ativo(""));
        assert!(is_ativo("N"));
        assert!(!is_ativo("S"));
        assert!(!is_ativo("s"));
    }
}
