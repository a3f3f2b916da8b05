//! Receivable title sync: page-ranged fetch, FK resolution against the
//! dimensions and a provisional open-balance seed. The definitive derived
//! values come from the recalculation engine afterwards.

use chrono::{DateTime, Utc};
use contracts::domain::StatusTitulo;
use contracts::sync::{SyncPageResult, SyncRunStatus};
use sea_orm::Set;
use serde_json::json;

use crate::domain::audit_sync_runs::repository as audit;
use crate::domain::{
    dim_categoria, dim_cliente, dim_conta_corrente, dim_departamento, dim_vendedor,
    fact_titulo_receber,
};
use crate::shared::omie::client::OmieApiClient;
use crate::shared::omie::endpoints;
use crate::shared::omie::pagination::{self, ListConfig, PaginationStyle};
use crate::shared::omie::types::{
    format_omie_date, non_empty, parse_many, parse_omie_date, OmieContaReceber,
};

const ENTITY: &str = "fact_titulo_receber";

/// Balance seeded at ingestion: closed titles carry nothing, open titles
/// start at the full document value.
fn initial_saldo(status_raw: &str, valor_documento: f64) -> f64 {
    if StatusTitulo::from_raw(status_raw).is_closed() {
        0.0
    } else {
        valor_documento
    }
}

/// Department allocation comes from the first distribution entry; the ERP
/// UI only ever fills one.
fn departamento_codigo(titulo: &OmieContaReceber) -> Option<&str> {
    titulo
        .distribuicao
        .first()
        .and_then(|d| d.codigo_departamento.as_deref())
        .filter(|c| !c.trim().is_empty())
}

pub async fn sync_titulos(
    client: &OmieApiClient,
    cursor: Option<&str>,
    from_page: u64,
    to_page: Option<u64>,
) -> anyhow::Result<SyncPageResult> {
    let mut params = json!({});
    if let Some(since) = cursor.and_then(|c| DateTime::parse_from_rfc3339(c).ok()) {
        // Incremental window on last-change date, in the ERP's date format.
        params["dDtAlterDe"] = json!(format_omie_date(since.date_naive()));
        params["dDtAlterAte"] = json!(format_omie_date(Utc::now().date_naive()));
    }

    let pages = pagination::list_pages(
        client,
        &ListConfig {
            endpoint: endpoints::CONTA_RECEBER,
            call: "ListarContasReceber",
            params,
            data_key: "conta_receber_cadastro",
            page_size: 200,
            style: PaginationStyle::Default,
        },
        from_page,
        to_page,
    )
    .await?;

    let total_pages = pages.total_pages;
    let last_page = pages.last_page;
    let done = pages.done();

    let batch = parse_many::<OmieContaReceber>(pages.records);
    let fetched = batch.valid.len() as u64;

    let (clientes, contas, departamentos, categorias, vendedores) = tokio::join!(
        dim_cliente::repository::lookup_by_codigo(),
        dim_conta_corrente::repository::lookup_by_codigo(),
        dim_departamento::repository::lookup_by_codigo(),
        dim_categoria::repository::lookup_by_codigo(),
        dim_vendedor::repository::lookup_by_codigo(),
    );
    let (clientes, contas, departamentos, categorias, vendedores) =
        (clientes?, contas?, departamentos?, categorias?, vendedores?);

    let now = Utc::now();
    let mut rows = Vec::with_capacity(batch.valid.len());
    let mut sem_cliente = 0usize;

    for titulo in batch.valid {
        // The customer FK is mandatory in the star schema; titles pointing
        // at a customer we have not ingested are skipped, not faked.
        let Some(&cliente_id) = clientes.get(&titulo.codigo_cliente_fornecedor) else {
            sem_cliente += 1;
            continue;
        };

        let departamento_id = departamento_codigo(&titulo)
            .and_then(|c| departamentos.get(c))
            .copied();
        let categoria_id = categorias.get(titulo.codigo_categoria.as_str()).copied();
        let conta_corrente_id = titulo
            .id_conta_corrente
            .filter(|&c| c > 0)
            .and_then(|c| contas.get(&c))
            .copied();
        let vendedor_id = titulo
            .codigo_vendedor
            .filter(|&v| v > 0)
            .and_then(|v| vendedores.get(&v))
            .copied();
        let saldo = initial_saldo(&titulo.status_titulo, titulo.valor_documento);

        rows.push(fact_titulo_receber::repository::ActiveModel {
            omie_codigo_titulo: Set(titulo.codigo_lancamento_omie),
            codigo_integracao: Set(non_empty(titulo.codigo_lancamento_integracao)),
            cliente_id: Set(cliente_id),
            conta_corrente_id: Set(conta_corrente_id),
            departamento_id: Set(departamento_id),
            categoria_id: Set(categoria_id),
            vendedor_id: Set(vendedor_id),
            numero_documento: Set(non_empty(titulo.numero_documento)),
            numero_parcela: Set(non_empty(titulo.numero_parcela)),
            data_emissao: Set(parse_omie_date(&titulo.data_emissao)),
            data_vencimento: Set(parse_omie_date(&titulo.data_vencimento)),
            data_previsao: Set(parse_omie_date(&titulo.data_previsao)),
            data_registro: Set(parse_omie_date(&titulo.data_registro)),
            valor_documento: Set(titulo.valor_documento),
            status_titulo: Set(titulo.status_titulo),
            observacao: Set(non_empty(titulo.observacao)),
            saldo_em_aberto: Set(saldo),
            updated_at: Set(Some(now)),
            ..Default::default()
        });
    }

    if sem_cliente > 0 {
        tracing::warn!("{} title(s) skipped: unknown customer code", sem_cliente);
    }

    let upserted = fact_titulo_receber::repository::upsert_batch(rows).await?;
    Ok(SyncPageResult {
        fetched,
        upserted,
        total_pages,
        last_page,
        done,
    })
}

/// Audited variant: reads the incremental cursor, records the run, and
/// advances the cursor only when a run starting at page 1 reached the end.
pub async fn run(
    client: &OmieApiClient,
    from_page: u64,
    to_page: Option<u64>,
) -> anyhow::Result<SyncPageResult> {
    let started = Utc::now();
    let cursor = audit::last_cursor(ENTITY).await.unwrap_or_else(|e| {
        tracing::error!("Cursor lookup failed for {}: {}", ENTITY, e);
        None
    });
    let run_id = audit::open_run(ENTITY).await;

    match sync_titulos(client, cursor.as_deref(), from_page, to_page).await {
        Ok(result) => {
            let next_cursor =
                (from_page <= 1 && result.done).then(|| started.to_rfc3339());
            audit::close_run(
                run_id,
                SyncRunStatus::Success,
                result.fetched,
                result.upserted,
                next_cursor,
                None,
            )
            .await;
            Ok(result)
        }
        Err(e) => {
            audit::close_run(
                run_id,
                SyncRunStatus::Error,
                0,
                0,
                None,
                Some(format!("{e:#}")),
            )
            .await;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_saldo_by_status() {
        assert_eq!(initial_saldo("ABERTO", 1500.0), 1500.0);
        assert_eq!(initial_saldo("ATRASADO", 1500.0), 1500.0);
        assert_eq!(initial_saldo("RECEBIDO", 1500.0), 0.0);
        assert_eq!(initial_saldo("CANCELADO", 1500.0), 0.0);
    }

    #[test]
    fn test_departamento_comes_from_first_distribution() {
        let titulo: OmieContaReceber = serde_json::from_value(json!({
            "codigo_lancamento_omie": 1,
            "codigo_cliente_fornecedor": 2,
            "distribuicao": [
                {"cCodDep": "1001", "nPerDep": 100.0},
                {"cCodDep": "2002"},
            ],
        }))
        .unwrap();
        assert_eq!(departamento_codigo(&titulo), Some("1001"));

        let sem_distribuicao: OmieContaReceber = serde_json::from_value(json!({
            "codigo_lancamento_omie": 1,
            "codigo_cliente_fornecedor": 2,
        }))
        .unwrap();
        assert_eq!(departamento_codigo(&sem_distribuicao), None);
    }
}
