use sea_orm::entity::prelude::*;
use sea_orm::sea_query::OnConflict;
use sea_orm::PaginatorTrait;
use serde::{Deserialize, Serialize};

use crate::shared::data::db::get_connection;

/// Settlement fact, one row per title. Movements arriving in several parts
/// are merged before they get here, so the external title code is unique.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "fact_recebimento")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub omie_codigo_titulo: i64,
    pub titulo_id: Option<i64>,
    pub conta_corrente_id: Option<i64>,
    pub data_baixa: Option<Date>,
    pub valor_baixado: f64,
    pub valor_desconto: f64,
    pub valor_juros: f64,
    pub valor_multa: f64,
    pub tipo_baixa: Option<String>,
    pub liquidado: bool,
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
                OnConflict::column(Column::OmieCodigoTitulo)
                    .update_columns([
                        Column::TituloId,
                        Column::ContaCorrenteId,
                        Column::DataBaixa,
                        Column::ValorBaixado,
                        Column::ValorDesconto,
                        Column::ValorJuros,
                        Column::ValorMulta,
                        Column::TipoBaixa,
                        Column::Liquidado,
                        Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(conn)
            .await?;
    }
    Ok(written)
}

/// Stored settlements for a set of title codes. Used by the incremental
/// sync to fold previously stored totals into a windowed fetch.
pub async fn find_by_codigos(codigos: &[i64]) -> anyhow::Result<Vec<Model>> {
    if codigos.is_empty() {
        return Ok(Vec::new());
    }
    let conn = get_connection();
    let mut rows = Vec::new();
    for chunk in codigos.chunks(CHUNK_SIZE) {
        rows.extend(
            Entity::find()
                .filter(Column::OmieCodigoTitulo.is_in(chunk.iter().copied()))
                .all(conn)
                .await?,
        );
    }
    Ok(rows)
}

/// Full table scan in pages, for the recalculation engine.
pub async fn fetch_all() -> anyhow::Result<Vec<Model>> {
    let conn = get_connection();
    let mut rows = Vec::new();
    let mut pages = Entity::find().paginate(conn, 1000);
    while let Some(batch) = pages.fetch_and_next().await? {
        rows.extend(batch);
    }
    Ok(rows)
}
