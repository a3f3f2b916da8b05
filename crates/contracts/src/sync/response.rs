use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a page-ranged fact sync (titles or settlements).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncPageResult {
    /// Records that survived validation.
    pub fetched: u64,

    /// Rows written to the store.
    pub upserted: u64,

    /// Total pages reported by the upstream API.
    pub total_pages: u64,

    /// Last page actually fetched in this call.
    pub last_page: u64,

    /// True when the last upstream page has been consumed.
    pub done: bool,
}

/// Per-entity outcome of one dimension sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionSyncResult {
    pub entity: String,
    pub records: u64,
    pub status: SyncRunStatus,
    pub error: Option<String>,
}

/// Outcome of the derived-metrics recalculation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecalcResult {
    /// Titles whose derived columns were rewritten.
    pub updated: u64,

    /// Settlement rows loaded from the store.
    pub recebimentos_loaded: u64,

    /// Title rows loaded from the store.
    pub titulos_loaded: u64,

    /// Distinct titles with at least one settlement.
    pub aggregation_count: u64,

    /// Per-row update failures; a failing row does not sink its batch.
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRunStatus {
    Running,
    Success,
    Error,
}

/// Summary of a full orchestrated sync run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRunResult {
    /// Audit row id of the `full_sync` record.
    pub run_id: i64,

    /// Correlation id for this invocation.
    pub session_id: String,

    pub status: SyncRunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    pub dimensions: Vec<DimensionSyncResult>,
    pub titulos: Option<SyncPageResult>,
    pub recebimentos: Option<SyncPageResult>,
    pub extrato: Option<SyncPageResult>,
    pub recalc: Option<RecalcResult>,

    /// One entry per failed step, prefixed with the step entity name.
    pub errors: Vec<String>,
}

/// Response of the step-selecting trigger endpoint.
///
/// Step failures are reported with HTTP 200 and `success: false` so that
/// operational tooling can always inspect the JSON body; only the auth check
/// answers with a non-200 status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerSyncResponse {
    pub success: bool,
    pub step: String,
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
