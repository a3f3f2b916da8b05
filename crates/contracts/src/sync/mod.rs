pub mod request;
pub mod response;

pub use request::{SyncStep, TriggerSyncRequest};
pub use response::{
    DimensionSyncResult, RecalcResult, SyncPageResult, SyncRunResult, SyncRunStatus,
    TriggerSyncResponse,
};
