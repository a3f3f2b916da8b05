//! Sync trigger endpoints. Step failures answer HTTP 200 with
//! `success: false` so the caller always gets the JSON outcome; only the
//! bearer-token check (middleware) produces a non-200 status.

use axum::Json;
use contracts::sync::{
    DimensionSyncResult, RecalcResult, SyncPageResult, SyncRunResult, SyncRunStatus, SyncStep,
    TriggerSyncRequest, TriggerSyncResponse,
};

use crate::shared::config::{self, DataMode};
use crate::shared::omie::client::OmieApiClient;
use crate::usecases::{
    u601_sync_dimensions, u602_sync_titulos, u603_sync_recebimentos, u604_sync_extrato,
    u605_recalc_metricas, u606_sync_orchestrator,
};

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

pub async fn trigger_full_sync() -> Json<TriggerSyncResponse> {
    trigger_sync(Json(TriggerSyncRequest {
        step: SyncStep::All,
        from_page: None,
        to_page: None,
    }))
    .await
}

pub async fn trigger_sync(Json(request): Json<TriggerSyncRequest>) -> Json<TriggerSyncResponse> {
    let step = request.step.entity_name().to_string();
    let config = config::get();

    if config.data.mode == DataMode::Mock {
        tracing::info!("Mock mode, skipping sync step {}", step);
        return Json(TriggerSyncResponse {
            success: true,
            step,
            message: "Mock mode - sync skipped".to_string(),
            result: None,
            error: None,
        });
    }

    let client = OmieApiClient::new(&config.omie);
    let from = request.from_page.unwrap_or(1).max(1);
    let to = request.to_page;

    let response = match request.step {
        SyncStep::Clientes => page_response(
            step,
            u601_sync_dimensions::executor::sync_clientes_pages(&client, from, to).await,
        ),
        SyncStep::ContasCorrentes => count_response(
            step,
            u601_sync_dimensions::executor::sync_contas_correntes(&client).await,
        ),
        SyncStep::Departamentos => count_response(
            step,
            u601_sync_dimensions::executor::sync_departamentos(&client).await,
        ),
        SyncStep::Categorias => count_response(
            step,
            u601_sync_dimensions::executor::sync_categorias(&client).await,
        ),
        SyncStep::Vendedores => count_response(
            step,
            u601_sync_dimensions::executor::sync_vendedores(&client).await,
        ),
        SyncStep::Dimensions => {
            dimensions_response(step, u601_sync_dimensions::executor::run(&client).await)
        }
        SyncStep::Titulos => page_response(
            step,
            u602_sync_titulos::executor::run(&client, from, to).await,
        ),
        SyncStep::Recebimentos => page_response(
            step,
            u603_sync_recebimentos::executor::run(&client, from, to).await,
        ),
        SyncStep::Extrato => {
            page_response(step, u604_sync_extrato::executor::run(&client).await)
        }
        SyncStep::Recalc => recalc_response(step, u605_recalc_metricas::executor::run().await),
        SyncStep::All => full_response(
            step,
            u606_sync_orchestrator::executor::run_full_sync(&client).await,
        ),
    };

    Json(response)
}

fn failure(step: String, error: String) -> TriggerSyncResponse {
    TriggerSyncResponse {
        success: false,
        step,
        message: "Sync step failed".to_string(),
        result: None,
        error: Some(error),
    }
}

fn page_response(step: String, outcome: anyhow::Result<SyncPageResult>) -> TriggerSyncResponse {
    match outcome {
        Ok(result) => TriggerSyncResponse {
            success: true,
            step,
            message: format!(
                "{} record(s) fetched, {} upserted",
                result.fetched, result.upserted
            ),
            result: serde_json::to_value(&result).ok(),
            error: None,
        },
        Err(e) => failure(step, format!("{e:#}")),
    }
}

fn count_response(step: String, outcome: anyhow::Result<u64>) -> TriggerSyncResponse {
    match outcome {
        Ok(records) => TriggerSyncResponse {
            success: true,
            step,
            message: format!("{} record(s) upserted", records),
            result: Some(serde_json::json!({ "records": records })),
            error: None,
        },
        Err(e) => failure(step, format!("{e:#}")),
    }
}

fn dimensions_response(step: String, results: Vec<DimensionSyncResult>) -> TriggerSyncResponse {
    let errors: Vec<String> = results
        .iter()
        .filter_map(|r| r.error.as_ref().map(|e| format!("[{}] {}", r.entity, e)))
        .collect();

    TriggerSyncResponse {
        success: errors.is_empty(),
        step,
        message: format!("{} dimension(s) synchronized", results.len()),
        result: serde_json::to_value(&results).ok(),
        error: (!errors.is_empty()).then(|| errors.join(" | ")),
    }
}

fn recalc_response(step: String, outcome: anyhow::Result<RecalcResult>) -> TriggerSyncResponse {
    match outcome {
        Ok(result) => TriggerSyncResponse {
            success: result.errors.is_empty(),
            step,
            message: format!("{} title(s) recalculated", result.updated),
            error: (!result.errors.is_empty()).then(|| result.errors.join(" | ")),
            result: serde_json::to_value(&result).ok(),
        },
        Err(e) => failure(step, format!("{e:#}")),
    }
}

fn full_response(step: String, outcome: anyhow::Result<SyncRunResult>) -> TriggerSyncResponse {
    match outcome {
        Ok(result) => TriggerSyncResponse {
            success: result.status == SyncRunStatus::Success,
            step,
            message: "Full sync finished".to_string(),
            error: (!result.errors.is_empty()).then(|| result.errors.join(" | ")),
            result: serde_json::to_value(&result).ok(),
        },
        Err(e) => failure(step, format!("{e:#}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_step_still_reports_the_step_name() {
        let response = page_response(
            "fact_titulo_receber".to_string(),
            Err(anyhow::anyhow!("HTTP 503")),
        );
        assert!(!response.success);
        assert_eq!(response.step, "fact_titulo_receber");
        assert!(response.error.unwrap().contains("HTTP 503"));
    }

    #[test]
    fn test_dimension_errors_flip_the_success_flag() {
        let results = vec![
            DimensionSyncResult {
                entity: "dim_cliente".to_string(),
                records: 12,
                status: SyncRunStatus::Success,
                error: None,
            },
            DimensionSyncResult {
                entity: "dim_vendedor".to_string(),
                records: 0,
                status: SyncRunStatus::Error,
                error: Some("timeout".to_string()),
            },
        ];
        let response = dimensions_response("dimensions".to_string(), results);
        assert!(!response.success);
        assert!(response.error.unwrap().contains("[dim_vendedor] timeout"));
    }
}
