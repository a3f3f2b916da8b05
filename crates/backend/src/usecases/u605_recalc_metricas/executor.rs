//! Derived-metrics recalculation.
//!
//! Reads every settlement and every title, aggregates settlements per title
//! and rewrites the four derived columns. Pure function of the stored facts,
//! so re-running it is always safe.

use std::collections::HashMap;

use contracts::sync::{RecalcResult, SyncRunStatus};

use crate::domain::audit_sync_runs::repository as audit;
use crate::domain::{fact_recebimento, fact_titulo_receber};

const ENTITY: &str = "recalc_metricas";
const UPDATE_BATCH: usize = 25;

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub(crate) struct TituloAgregado {
    /// Cash collected: paid amount plus interest and penalty.
    pub caixa: f64,
    pub desconto: f64,
    /// Principal settled: paid amount plus discount granted.
    pub principal: f64,
}

/// Aggregate settlements per external title code. Reversals and cancelled
/// settlements carry no economic effect and are skipped.
pub(crate) fn aggregate_baixas(
    baixas: &[fact_recebimento::repository::Model],
) -> HashMap<i64, TituloAgregado> {
    let mut map: HashMap<i64, TituloAgregado> = HashMap::new();

    for baixa in baixas {
        if matches!(baixa.tipo_baixa.as_deref(), Some("ESTORNO") | Some("CANCELADO")) {
            continue;
        }
        let entry = map.entry(baixa.omie_codigo_titulo).or_default();
        entry.caixa += baixa.valor_baixado + baixa.valor_juros + baixa.valor_multa;
        entry.desconto += baixa.valor_desconto;
        entry.principal += baixa.valor_baixado + baixa.valor_desconto;
    }
    map
}

/// Open balance never goes negative, whatever the ERP reports as paid.
pub(crate) fn saldo_aberto(valor_documento: f64, principal: f64) -> f64 {
    (valor_documento - principal).max(0.0)
}

/// Round to 2 decimals at the write boundary; intermediate sums keep full
/// precision.
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub async fn recalc_metricas() -> anyhow::Result<RecalcResult> {
    let baixas = fact_recebimento::repository::fetch_all().await?;
    let titulos = fact_titulo_receber::repository::fetch_all().await?;
    let aggregated = aggregate_baixas(&baixas);

    let mut updates = Vec::new();
    for titulo in &titulos {
        if let Some(agg) = aggregated.get(&titulo.omie_codigo_titulo) {
            let saldo = saldo_aberto(titulo.valor_documento, agg.principal);
            updates.push((
                titulo.id,
                round2(agg.caixa),
                round2(agg.desconto),
                round2(agg.principal),
                round2(saldo),
            ));
        }
    }

    let mut updated = 0u64;
    let mut errors = Vec::new();

    for chunk in updates.chunks(UPDATE_BATCH) {
        let mut handles = Vec::with_capacity(chunk.len());
        for &(id, caixa, desconto, principal, saldo) in chunk {
            handles.push(tokio::spawn(async move {
                fact_titulo_receber::repository::update_derived(
                    id, caixa, desconto, principal, saldo,
                )
                .await
                .map_err(|e| format!("titulo {id}: {e:#}"))
            }));
        }
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => updated += 1,
                Ok(Err(msg)) => errors.push(msg),
                Err(e) => errors.push(format!("update task: {e}")),
            }
        }
    }

    if !errors.is_empty() {
        tracing::error!("Recalculation finished with {} row failure(s)", errors.len());
    }

    Ok(RecalcResult {
        updated,
        recebimentos_loaded: baixas.len() as u64,
        titulos_loaded: titulos.len() as u64,
        aggregation_count: aggregated.len() as u64,
        errors,
    })
}

/// Audited variant. Row-level failures mark the audit record as errored but
/// still return the partial result.
pub async fn run() -> anyhow::Result<RecalcResult> {
    let run_id = audit::open_run(ENTITY).await;

    match recalc_metricas().await {
        Ok(result) => {
            let status = if result.errors.is_empty() {
                SyncRunStatus::Success
            } else {
                SyncRunStatus::Error
            };
            audit::close_run(
                run_id,
                status,
                result.recebimentos_loaded,
                result.updated,
                None,
                (!result.errors.is_empty()).then(|| result.errors.join(" | ")),
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

    fn baixa(
        codigo_titulo: i64,
        pago: f64,
        desconto: f64,
        juros: f64,
        multa: f64,
        tipo: &str,
    ) -> fact_recebimento::repository::Model {
        fact_recebimento::repository::Model {
            id: 0,
            omie_codigo_titulo: codigo_titulo,
            titulo_id: None,
            conta_corrente_id: None,
            data_baixa: None,
            valor_baixado: pago,
            valor_desconto: desconto,
            valor_juros: juros,
            valor_multa: multa,
            tipo_baixa: Some(tipo.to_string()),
            liquidado: false,
            updated_at: None,
        }
    }

    #[test]
    fn test_cash_includes_interest_and_penalty() {
        let agg = aggregate_baixas(&[baixa(1, 100.0, 0.0, 3.0, 7.0, "JUROS")]);
        let titulo = agg[&1];
        assert_eq!(titulo.caixa, 110.0);
        assert_eq!(titulo.principal, 100.0);
        assert_eq!(titulo.desconto, 0.0);
    }

    #[test]
    fn test_reversals_and_cancellations_are_excluded() {
        let agg = aggregate_baixas(&[
            baixa(1, 100.0, 0.0, 0.0, 0.0, "BAIXA"),
            baixa(2, -100.0, 0.0, 0.0, 0.0, "ESTORNO"),
            baixa(3, 50.0, 0.0, 0.0, 0.0, "CANCELADO"),
        ]);
        assert_eq!(agg.len(), 1);
        assert!(agg.contains_key(&1));
    }

    #[test]
    fn test_full_discount_settles_principal_without_cash() {
        // A title written off entirely by discount: nothing was ever paid.
        let agg = aggregate_baixas(&[baixa(9, 0.0, 200.0, 0.0, 0.0, "DESCONTO")]);
        let titulo = agg[&9];
        assert_eq!(titulo.caixa, 0.0);
        assert_eq!(titulo.principal, 200.0);
        assert_eq!(titulo.desconto, 200.0);
        assert_eq!(saldo_aberto(200.0, titulo.principal), 0.0);
    }

    #[test]
    fn test_balance_floors_at_zero_on_overpayment() {
        assert_eq!(saldo_aberto(100.0, 120.0), 0.0);
        assert_eq!(saldo_aberto(100.0, 40.0), 60.0);
    }

    #[test]
    fn test_rounding_happens_at_the_write_boundary() {
        // 0.1 + 0.2 drifts in binary; the stored value must not.
        let agg = aggregate_baixas(&[
            baixa(4, 0.1, 0.0, 0.0, 0.0, "BAIXA"),
            baixa(4, 0.2, 0.0, 0.0, 0.0, "BAIXA"),
        ]);
        assert_eq!(round2(agg[&4].caixa), 0.3);
        assert_eq!(round2(123.456), 123.46);
    }

    #[test]
    fn test_aggregation_is_deterministic() {
        let rows = vec![
            baixa(1, 10.0, 1.0, 0.5, 0.0, "DESCONTO"),
            baixa(2, 20.0, 0.0, 0.0, 2.0, "MULTA"),
            baixa(1, 5.0, 0.0, 0.0, 0.0, "BAIXA"),
        ];
        assert_eq!(aggregate_baixas(&rows), aggregate_baixas(&rows));
    }
}
