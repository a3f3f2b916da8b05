use sea_orm::entity::prelude::*;
use sea_orm::sea_query::OnConflict;
use serde::{Deserialize, Serialize};

use crate::shared::data::db::get_connection;

/// Bank statement line, keyed by the ERP movement code.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "fact_extrato_cc")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub omie_codigo_movimento: i64,
    pub conta_corrente_id: Option<i64>,
    pub data_movimento: Option<Date>,
    pub descricao: Option<String>,
    pub tipo: Option<String>,
    pub valor: f64,
    pub saldo: Option<f64>,
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
                OnConflict::column(Column::OmieCodigoMovimento)
                    .update_columns([
                        Column::ContaCorrenteId,
                        Column::DataMovimento,
                        Column::Descricao,
                        Column::Tipo,
                        Column::Valor,
                        Column::Saldo,
                        Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(conn)
            .await?;
    }
    Ok(written)
}
