//! Full sync orchestration: dimensions, then titles, then settlements, then
//! the recalculation, then bank statements. Every step is best effort; a
//! failing step is recorded and the sequence moves on.

use std::future::Future;

use chrono::Utc;
use contracts::sync::{SyncRunResult, SyncRunStatus};

use crate::domain::audit_sync_runs::repository as audit;
use crate::shared::omie::client::OmieApiClient;
use crate::usecases::{
    u601_sync_dimensions, u602_sync_titulos, u603_sync_recebimentos, u604_sync_extrato,
    u605_recalc_metricas,
};

/// Run one step under the best-effort policy: a failure lands in `errors`
/// prefixed with the step name, and the run continues.
pub(crate) async fn execute_step<T, Fut>(
    name: &str,
    step: Fut,
    errors: &mut Vec<String>,
) -> Option<T>
where
    Fut: Future<Output = anyhow::Result<T>>,
{
    match step.await {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::error!("Sync step {} failed: {:#}", name, e);
            errors.push(format!("[{name}] {e:#}"));
            None
        }
    }
}

pub async fn run_full_sync(client: &OmieApiClient) -> anyhow::Result<SyncRunResult> {
    let started = Utc::now();
    let run_id = audit::create_run("full_sync").await?;
    let session_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(session = %session_id, "Full sync started");

    let mut errors: Vec<String> = Vec::new();

    let dimensions = u601_sync_dimensions::executor::run(client).await;
    for dim in &dimensions {
        if let Some(e) = &dim.error {
            errors.push(format!("[{}] {}", dim.entity, e));
        }
    }

    let titulos = execute_step(
        "fact_titulo_receber",
        u602_sync_titulos::executor::run(client, 1, None),
        &mut errors,
    )
    .await;

    let recebimentos = execute_step(
        "fact_recebimento",
        u603_sync_recebimentos::executor::run(client, 1, None),
        &mut errors,
    )
    .await;

    // Metrics always follow the settlement step so a partially failed run
    // still leaves the derived columns consistent with whatever landed.
    let recalc = execute_step(
        "recalc_metricas",
        u605_recalc_metricas::executor::run(),
        &mut errors,
    )
    .await;

    let extrato = execute_step(
        "fact_extrato_cc",
        u604_sync_extrato::executor::run(client),
        &mut errors,
    )
    .await;

    let status = if errors.is_empty() {
        SyncRunStatus::Success
    } else {
        SyncRunStatus::Error
    };

    let fetched: u64 = dimensions.iter().map(|d| d.records).sum::<u64>()
        + titulos.as_ref().map_or(0, |r| r.fetched)
        + recebimentos.as_ref().map_or(0, |r| r.fetched)
        + extrato.as_ref().map_or(0, |r| r.fetched);
    let upserted: u64 = dimensions.iter().map(|d| d.records).sum::<u64>()
        + titulos.as_ref().map_or(0, |r| r.upserted)
        + recebimentos.as_ref().map_or(0, |r| r.upserted)
        + extrato.as_ref().map_or(0, |r| r.upserted)
        + recalc.as_ref().map_or(0, |r| r.updated);

    audit::close_run(
        Some(run_id),
        status,
        fetched,
        upserted,
        Some(started.to_rfc3339()),
        (!errors.is_empty()).then(|| errors.join(" | ")),
    )
    .await;

    let finished = Utc::now();
    tracing::info!(
        session = %session_id,
        status = ?status,
        errors = errors.len(),
        "Full sync finished in {}ms",
        (finished - started).num_milliseconds()
    );

    Ok(SyncRunResult {
        run_id,
        session_id,
        status,
        started_at: started,
        finished_at: finished,
        dimensions,
        titulos,
        recebimentos,
        extrato,
        recalc,
        errors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_a_failing_step_does_not_stop_the_next_one() {
        let mut errors = Vec::new();

        let first: Option<u32> =
            execute_step("step_a", async { anyhow::bail!("upstream down") }, &mut errors).await;
        let second =
            execute_step("step_b", async { Ok::<_, anyhow::Error>(42u32) }, &mut errors).await;

        assert_eq!(first, None);
        assert_eq!(second, Some(42));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("[step_a]"));
    }
}
