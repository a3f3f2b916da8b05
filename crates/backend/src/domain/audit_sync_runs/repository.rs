use chrono::Utc;
use contracts::sync::SyncRunStatus;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveModelTrait, QueryOrder, Set};
use serde::{Deserialize, Serialize};

use crate::shared::data::db::get_connection;

/// One row per sync run or orchestrated step. Successful runs carry the
/// cursor that the next incremental window starts from.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "audit_sync_runs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub entity: String,
    pub started_at: DateTimeUtc,
    pub finished_at: Option<DateTimeUtc>,
    pub status: String,
    pub records_fetched: i64,
    pub records_upserted: i64,
    pub last_sync_cursor: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

fn status_str(status: SyncRunStatus) -> &'static str {
    match status {
        SyncRunStatus::Running => "running",
        SyncRunStatus::Success => "success",
        SyncRunStatus::Error => "error",
    }
}

pub async fn create_run(entity: &str) -> anyhow::Result<i64> {
    let model = ActiveModel {
        entity: Set(entity.to_string()),
        started_at: Set(Utc::now()),
        status: Set(status_str(SyncRunStatus::Running).to_string()),
        records_fetched: Set(0),
        records_upserted: Set(0),
        ..Default::default()
    };
    let result = Entity::insert(model).exec(get_connection()).await?;
    Ok(result.last_insert_id)
}

pub async fn complete_run(
    run_id: i64,
    status: SyncRunStatus,
    fetched: u64,
    upserted: u64,
    cursor: Option<String>,
    error: Option<String>,
) -> anyhow::Result<()> {
    let model = ActiveModel {
        id: Set(run_id),
        finished_at: Set(Some(Utc::now())),
        status: Set(status_str(status).to_string()),
        records_fetched: Set(fetched as i64),
        records_upserted: Set(upserted as i64),
        last_sync_cursor: Set(cursor),
        error_message: Set(error),
        ..Default::default()
    };
    model.update(get_connection()).await?;
    Ok(())
}

/// Cursor of the most recent successful run for an entity.
pub async fn last_cursor(entity: &str) -> anyhow::Result<Option<String>> {
    let row = Entity::find()
        .filter(Column::Entity.eq(entity))
        .filter(Column::Status.eq(status_str(SyncRunStatus::Success)))
        .order_by_desc(Column::StartedAt)
        .one(get_connection())
        .await?;
    Ok(row.and_then(|r| r.last_sync_cursor))
}

/// Audit writes are best effort: a failed insert must never sink the sync
/// it describes, so these variants log and carry on.
pub async fn open_run(entity: &str) -> Option<i64> {
    match create_run(entity).await {
        Ok(id) => Some(id),
        Err(e) => {
            tracing::error!("Failed to open audit record for {}: {}", entity, e);
            None
        }
    }
}

pub async fn close_run(
    run_id: Option<i64>,
    status: SyncRunStatus,
    fetched: u64,
    upserted: u64,
    cursor: Option<String>,
    error: Option<String>,
) {
    let Some(id) = run_id else { return };
    if let Err(e) = complete_run(id, status, fetched, upserted, cursor, error).await {
        tracing::error!("Failed to close audit record {}: {}", id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cursor_comes_from_latest_successful_run() {
        crate::shared::data::db::initialize_test_database().await;

        let first = create_run("cursor_probe").await.unwrap();
        complete_run(
            first,
            SyncRunStatus::Success,
            10,
            10,
            Some("2026-01-01T00:00:00Z".to_string()),
            None,
        )
        .await
        .unwrap();

        let second = create_run("cursor_probe").await.unwrap();
        complete_run(
            second,
            SyncRunStatus::Error,
            0,
            0,
            None,
            Some("boom".to_string()),
        )
        .await
        .unwrap();

        // The failed run must not advance the cursor.
        let cursor = last_cursor("cursor_probe").await.unwrap();
        assert_eq!(cursor.as_deref(), Some("2026-01-01T00:00:00Z"));
        assert_eq!(last_cursor("unknown_entity").await.unwrap(), None);
    }
}
