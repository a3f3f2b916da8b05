//! Settlement sync. The financial-movement endpoint returns one record per
//! partial payment; records are merged per title before hitting the store,
//! so `fact_recebimento` stays one-row-per-title.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, Utc};
use contracts::sync::{SyncPageResult, SyncRunStatus};
use sea_orm::Set;
use serde_json::json;

use crate::domain::audit_sync_runs::repository as audit;
use crate::domain::{dim_conta_corrente, fact_recebimento, fact_titulo_receber};
use crate::shared::omie::client::OmieApiClient;
use crate::shared::omie::endpoints;
use crate::shared::omie::pagination::{self, ListConfig, PaginationStyle};
use crate::shared::omie::types::{format_omie_date, parse_many, parse_omie_date, OmieMovimento};

const ENTITY: &str = "fact_recebimento";
const NATUREZA_RECEBIMENTO: &str = "REC";

#[derive(Debug, Default, PartialEq)]
pub(crate) struct BaixaAgregada {
    pub omie_codigo_titulo: i64,
    pub conta_corrente_codigo: Option<i64>,
    pub data_baixa: Option<NaiveDate>,
    pub valor_baixado: f64,
    pub valor_desconto: f64,
    pub valor_juros: f64,
    pub valor_multa: f64,
    pub liquidado: bool,
}

/// Merge movement records into one settlement per title.
///
/// Only receivable-nature movements with a resolvable title code and a
/// strictly positive paid amount participate. Amounts are summed, the
/// settlement date is the latest one seen, and a title is liquidated if any
/// of its parts is.
pub(crate) fn merge_movimentos(movimentos: Vec<OmieMovimento>) -> Vec<BaixaAgregada> {
    let mut by_titulo: BTreeMap<i64, BaixaAgregada> = BTreeMap::new();

    for mov in movimentos {
        if !mov.detalhes.natureza.eq_ignore_ascii_case(NATUREZA_RECEBIMENTO) {
            continue;
        }
        let Some(codigo) = mov.detalhes.n_cod_titulo.filter(|&c| c > 0) else {
            continue;
        };
        if mov.resumo.valor_pago <= 0.0 {
            continue;
        }

        let entry = by_titulo.entry(codigo).or_insert_with(|| BaixaAgregada {
            omie_codigo_titulo: codigo,
            ..Default::default()
        });
        entry.valor_baixado += mov.resumo.valor_pago;
        entry.valor_desconto += mov.resumo.desconto;
        entry.valor_juros += mov.resumo.juros;
        entry.valor_multa += mov.resumo.multa;
        if entry.conta_corrente_codigo.is_none() {
            entry.conta_corrente_codigo = mov.detalhes.n_cod_cc.filter(|&c| c > 0);
        }
        if let Some(data) = parse_omie_date(&mov.detalhes.data_pagamento) {
            entry.data_baixa = Some(entry.data_baixa.map_or(data, |d| d.max(data)));
        }
        if mov.resumo.liquidado.eq_ignore_ascii_case("S") {
            entry.liquidado = true;
        }
    }

    by_titulo.into_values().collect()
}

/// Fold an already-stored settlement into a freshly merged one. A
/// date-windowed fetch only carries the payments inside the window; the
/// stored sums are the rest of the title's history.
pub(crate) fn fold_stored(
    baixa: &mut BaixaAgregada,
    stored: &fact_recebimento::repository::Model,
) {
    baixa.valor_baixado += stored.valor_baixado;
    baixa.valor_desconto += stored.valor_desconto;
    baixa.valor_juros += stored.valor_juros;
    baixa.valor_multa += stored.valor_multa;
    if let Some(data) = stored.data_baixa {
        baixa.data_baixa = Some(baixa.data_baixa.map_or(data, |d| d.max(data)));
    }
    baixa.liquidado |= stored.liquidado;
}

/// Classify a merged settlement by its dominant component.
pub(crate) fn derive_tipo_baixa(baixa: &BaixaAgregada) -> &'static str {
    if baixa.valor_baixado < 0.0 {
        "ESTORNO"
    } else if baixa.valor_desconto > 0.0 {
        "DESCONTO"
    } else if baixa.valor_juros > 0.0 {
        "JUROS"
    } else if baixa.valor_multa > 0.0 {
        "MULTA"
    } else {
        "BAIXA"
    }
}

pub async fn sync_recebimentos(
    client: &OmieApiClient,
    cursor: Option<&str>,
    from_page: u64,
    to_page: Option<u64>,
) -> anyhow::Result<SyncPageResult> {
    let mut params = json!({ "cNatureza": NATUREZA_RECEBIMENTO });
    if let Some(since) = cursor.and_then(|c| DateTime::parse_from_rfc3339(c).ok()) {
        params["dDtPagtoDe"] = json!(format_omie_date(since.date_naive()));
        params["dDtPagtoAte"] = json!(format_omie_date(Utc::now().date_naive()));
    }

    let pages = pagination::list_pages(
        client,
        &ListConfig {
            endpoint: endpoints::MOVIMENTOS_FINANCEIROS,
            call: "PesquisarLancamentos",
            params,
            data_key: "movimentos",
            page_size: 100,
            style: PaginationStyle::Mf,
        },
        from_page,
        to_page,
    )
    .await?;

    let total_pages = pages.total_pages;
    let last_page = pages.last_page;
    let done = pages.done();

    let batch = parse_many::<OmieMovimento>(pages.records);
    let fetched = batch.valid.len() as u64;
    let merged = merge_movimentos(batch.valid);

    // With an active cursor the fetch is windowed on payment date, so the
    // merge only saw this window's payments. Pull the stored rows for the
    // affected titles and fold them in before the upsert replaces them.
    let stored: HashMap<i64, fact_recebimento::repository::Model> = if cursor.is_some() {
        let codigos: Vec<i64> = merged.iter().map(|b| b.omie_codigo_titulo).collect();
        fact_recebimento::repository::find_by_codigos(&codigos)
            .await?
            .into_iter()
            .map(|m| (m.omie_codigo_titulo, m))
            .collect()
    } else {
        HashMap::new()
    };

    let (titulos, contas) = tokio::join!(
        fact_titulo_receber::repository::lookup_by_codigo(),
        dim_conta_corrente::repository::lookup_by_codigo(),
    );
    let (titulos, contas) = (titulos?, contas?);

    let now = Utc::now();
    let rows: Vec<fact_recebimento::repository::ActiveModel> = merged
        .into_iter()
        .map(|mut baixa| {
            let prev = stored.get(&baixa.omie_codigo_titulo);
            if let Some(prev) = prev {
                fold_stored(&mut baixa, prev);
            }
            let tipo = derive_tipo_baixa(&baixa);
            fact_recebimento::repository::ActiveModel {
                omie_codigo_titulo: Set(baixa.omie_codigo_titulo),
                // The title may not be ingested yet; the external code still
                // keys the row and the FK resolves on the next sync.
                titulo_id: Set(titulos.get(&baixa.omie_codigo_titulo).copied()),
                conta_corrente_id: Set(baixa
                    .conta_corrente_codigo
                    .and_then(|c| contas.get(&c))
                    .copied()
                    .or_else(|| prev.and_then(|p| p.conta_corrente_id))),
                data_baixa: Set(baixa.data_baixa),
                valor_baixado: Set(baixa.valor_baixado),
                valor_desconto: Set(baixa.valor_desconto),
                valor_juros: Set(baixa.valor_juros),
                valor_multa: Set(baixa.valor_multa),
                tipo_baixa: Set(Some(tipo.to_string())),
                liquidado: Set(baixa.liquidado),
                updated_at: Set(Some(now)),
                ..Default::default()
            }
        })
        .collect();

    let upserted = fact_recebimento::repository::upsert_batch(rows).await?;
    Ok(SyncPageResult {
        fetched,
        upserted,
        total_pages,
        last_page,
        done,
    })
}

/// Audited variant with incremental payment-date window.
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

    match sync_recebimentos(client, cursor.as_deref(), from_page, to_page).await {
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

    fn movimento(titulo: Option<i64>, pago: f64, liquidado: &str, data: &str) -> OmieMovimento {
        serde_json::from_value(json!({
            "detalhes": {
                "nCodTitulo": titulo,
                "cNatureza": "REC",
                "dDtPagamento": data,
            },
            "resumo": {
                "nValPago": pago,
                "cLiquidado": liquidado,
            },
        }))
        .unwrap()
    }

    #[test]
    fn test_partial_payments_merge_into_one_settlement() {
        let merged = merge_movimentos(vec![
            movimento(Some(77), 100.0, "N", "01/02/2026"),
            movimento(Some(77), 50.0, "N", "15/02/2026"),
            movimento(Some(77), 25.0, "S", "10/02/2026"),
        ]);

        assert_eq!(merged.len(), 1);
        let baixa = &merged[0];
        assert_eq!(baixa.omie_codigo_titulo, 77);
        assert_eq!(baixa.valor_baixado, 175.0);
        assert!(baixa.liquidado);
        // Latest payment date wins, not the last record seen.
        assert_eq!(baixa.data_baixa, NaiveDate::from_ymd_opt(2026, 2, 15));
    }

    #[test]
    fn test_non_positive_and_unresolvable_movements_are_dropped() {
        let merged = merge_movimentos(vec![
            movimento(Some(10), 0.0, "N", ""),
            movimento(Some(11), -20.0, "N", ""),
            movimento(None, 30.0, "N", ""),
            movimento(Some(12), 40.0, "N", ""),
        ]);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].omie_codigo_titulo, 12);
    }

    #[test]
    fn test_other_natures_are_ignored() {
        let mut pagamento = movimento(Some(55), 99.0, "N", "");
        pagamento.detalhes.natureza = "PAG".to_string();
        assert!(merge_movimentos(vec![pagamento]).is_empty());
    }

    #[test]
    fn test_fold_stored_accumulates_history() {
        let mut baixa = BaixaAgregada {
            omie_codigo_titulo: 42,
            data_baixa: NaiveDate::from_ymd_opt(2026, 3, 20),
            valor_baixado: 50.0,
            valor_juros: 2.0,
            ..Default::default()
        };
        let stored = fact_recebimento::repository::Model {
            id: 1,
            omie_codigo_titulo: 42,
            titulo_id: None,
            conta_corrente_id: Some(7),
            data_baixa: NaiveDate::from_ymd_opt(2026, 3, 5),
            valor_baixado: 100.0,
            valor_desconto: 10.0,
            valor_juros: 0.0,
            valor_multa: 0.0,
            tipo_baixa: Some("DESCONTO".to_string()),
            liquidado: true,
            updated_at: None,
        };

        fold_stored(&mut baixa, &stored);

        assert_eq!(baixa.valor_baixado, 150.0);
        assert_eq!(baixa.valor_desconto, 10.0);
        assert_eq!(baixa.valor_juros, 2.0);
        assert_eq!(baixa.data_baixa, NaiveDate::from_ymd_opt(2026, 3, 20));
        assert!(baixa.liquidado);
    }

    #[tokio::test]
    async fn test_windowed_resync_keeps_earlier_payments() {
        use axum::routing::post;
        use axum::{Json, Router};
        use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;
        use std::time::Duration;

        crate::shared::data::db::initialize_test_database().await;

        // First fetch returns the full history (one payment of 100); the
        // second, window-filtered fetch only sees the new payment of 50.
        let hits = Arc::new(AtomicUsize::new(0));
        let handler_hits = hits.clone();
        let app = Router::new().route(
            endpoints::MOVIMENTOS_FINANCEIROS,
            post(move || {
                let hits = handler_hits.clone();
                async move {
                    let first = hits.fetch_add(1, Ordering::SeqCst) == 0;
                    let (pago, data, liquidado) = if first {
                        (100.0, "05/03/2026", "N")
                    } else {
                        (50.0, "20/03/2026", "S")
                    };
                    Json(json!({
                        "nTotPaginas": 1,
                        "movimentos": [{
                            "detalhes": {
                                "nCodTitulo": 930_001,
                                "cNatureza": "REC",
                                "dDtPagamento": data,
                            },
                            "resumo": { "nValPago": pago, "cLiquidado": liquidado },
                        }],
                    }))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let config = crate::shared::config::OmieConfig {
            base_url: format!("http://{addr}"),
            app_key: "key".to_string(),
            app_secret: "secret".to_string(),
        };
        let client = OmieApiClient::with_policy(
            &config,
            crate::shared::omie::client::RetryPolicy::default(),
            Arc::new(crate::shared::omie::client::RateLimiter::new(
                3,
                Duration::ZERO,
            )),
        );

        sync_recebimentos(&client, None, 1, None).await.unwrap();
        let cursor = Utc::now().to_rfc3339();
        sync_recebimentos(&client, Some(&cursor), 1, None)
            .await
            .unwrap();

        let row = fact_recebimento::repository::Entity::find()
            .filter(
                fact_recebimento::repository::Column::OmieCodigoTitulo.eq(930_001),
            )
            .one(crate::shared::data::db::get_connection())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.valor_baixado, 150.0);
        assert!(row.liquidado);
        assert_eq!(row.data_baixa, NaiveDate::from_ymd_opt(2026, 3, 20));
    }

    #[test]
    fn test_derive_tipo_baixa_precedence() {
        let base = BaixaAgregada {
            omie_codigo_titulo: 1,
            valor_baixado: 100.0,
            ..Default::default()
        };
        assert_eq!(derive_tipo_baixa(&base), "BAIXA");

        let desconto = BaixaAgregada { valor_desconto: 5.0, valor_juros: 1.0, ..base };
        assert_eq!(derive_tipo_baixa(&desconto), "DESCONTO");

        let juros = BaixaAgregada {
            omie_codigo_titulo: 1,
            valor_baixado: 100.0,
            valor_juros: 1.0,
            valor_multa: 2.0,
            ..Default::default()
        };
        assert_eq!(derive_tipo_baixa(&juros), "JUROS");

        let estorno = BaixaAgregada {
            omie_codigo_titulo: 1,
            valor_baixado: -100.0,
            valor_desconto: 5.0,
            ..Default::default()
        };
        assert_eq!(derive_tipo_baixa(&estorno), "ESTORNO");
    }
}
