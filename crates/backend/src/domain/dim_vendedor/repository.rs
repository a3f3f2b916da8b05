use std::collections::HashMap;

use sea_orm::entity::prelude::*;
use sea_orm::sea_query::OnConflict;
use sea_orm::PaginatorTrait;
use serde::{Deserialize, Serialize};

use crate::shared::data::db::get_connection;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "dim_vendedor")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub omie_codigo: i64,
    pub nome: String,
    pub email: Option<String>,
    pub ativo: bool,
    pub updated_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

const CHUNK_SIZE: usize = 500;

pub async fn upsert_batch(rows: Vec<ActiveModel>) -> anyhow::Result<u64> {
    if rows.is_empty() {
        return Ok(0);
    }
    let conn = get_connection();
    let mut written = 0u64;

    for chunk in rows.chunks(CHUNK_SIZE) {
        written += Entity::insert_many(chunk.to_vec())
            .on_conflict(
                OnConflict::column(Column::OmieCodigo)
                    .update_columns([
                        Column::Nome,
                        Column::Email,
                        Column::Ativo,
                        Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(conn)
            .await?;
    }
    Ok(written)
}

pub async fn lookup_by_codigo() -> anyhow::Result<HashMap<i64, i64>> {
    let conn = get_connection();
    let mut map = HashMap::new();
    let mut pages = Entity::find().paginate(conn, 1000);
    while let Some(batch) = pages.fetch_and_next().await? {
        for row in batch {
            map.insert(row.omie_codigo, row.id);
        }
    }
    Ok(map)
}
