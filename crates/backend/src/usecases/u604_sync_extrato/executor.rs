//! Bank statement sync: one `ObterExtrato` call per active account. The
//! endpoint is not paginated; the window defaults to the last 90 days when
//! no cursor exists yet.

use chrono::{DateTime, Duration, Utc};
use contracts::sync::{SyncPageResult, SyncRunStatus};
use sea_orm::Set;
use serde_json::{json, Value};

use crate::domain::audit_sync_runs::repository as audit;
use crate::domain::{dim_conta_corrente, fact_extrato_cc};
use crate::shared::omie::client::OmieApiClient;
use crate::shared::omie::endpoints;
use crate::shared::omie::types::{
    format_omie_date, non_empty, parse_many, parse_omie_date, OmieExtratoMovimento,
};

const ENTITY: &str = "fact_extrato_cc";
const DEFAULT_WINDOW_DAYS: i64 = 90;

pub async fn sync_extrato(
    client: &OmieApiClient,
    cursor: Option<&str>,
) -> anyhow::Result<SyncPageResult> {
    let contas = dim_conta_corrente::repository::list_active().await?;

    let hoje = Utc::now().date_naive();
    let desde = cursor
        .and_then(|c| DateTime::parse_from_rfc3339(c).ok())
        .map(|d| d.date_naive())
        .unwrap_or_else(|| hoje - Duration::days(DEFAULT_WINDOW_DAYS));

    let now = Utc::now();
    let mut fetched = 0u64;
    let mut rows = Vec::new();

    for conta in &contas {
        let params = json!({
            "nCodCC": conta.omie_codigo,
            "dDtDe": format_omie_date(desde),
            "dDtAte": format_omie_date(hoje),
        });
        let response = client
            .call(endpoints::EXTRATO, "ObterExtrato", params)
            .await?;

        let raw = response
            .get("listaMovimentos")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let batch = parse_many::<OmieExtratoMovimento>(raw);
        fetched += batch.valid.len() as u64;

        for mov in batch.valid {
            rows.push(fact_extrato_cc::repository::ActiveModel {
                omie_codigo_movimento: Set(mov.n_cod_mov_cc),
                conta_corrente_id: Set(Some(conta.id)),
                data_movimento: Set(parse_omie_date(&mov.data_movimento)),
                descricao: Set(non_empty(mov.descricao)),
                tipo: Set(non_empty(mov.tipo)),
                valor: Set(mov.valor),
                saldo: Set(mov.saldo),
                updated_at: Set(Some(now)),
                ..Default::default()
            });
        }
    }

    let upserted = fact_extrato_cc::repository::upsert_batch(rows).await?;
    Ok(SyncPageResult {
        fetched,
        upserted,
        total_pages: 1,
        last_page: 1,
        done: true,
    })
}

/// Audited variant with incremental movement-date window.
pub async fn run(client: &OmieApiClient) -> anyhow::Result<SyncPageResult> {
    let started = Utc::now();
    let cursor = audit::last_cursor(ENTITY).await.unwrap_or_else(|e| {
        tracing::error!("Cursor lookup failed for {}: {}", ENTITY, e);
        None
    });
    let run_id = audit::open_run(ENTITY).await;

    match sync_extrato(client, cursor.as_deref()).await {
        Ok(result) => {
            audit::close_run(
                run_id,
                SyncRunStatus::Success,
                result.fetched,
                result.upserted,
                Some(started.to_rfc3339()),
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
