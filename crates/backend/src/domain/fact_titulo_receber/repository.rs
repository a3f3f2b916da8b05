use std::collections::HashMap;

use sea_orm::entity::prelude::*;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{PaginatorTrait, QueryFilter};
use serde::{Deserialize, Serialize};

use crate::shared::data::db::get_connection;

/// Receivable title fact. Raw columns mirror the ERP payload; the four
/// derived value columns (`caixa_recebido`, `desconto_concedido`,
/// `principal_liquidado`, `saldo_em_aberto`) are rewritten by the
/// recalculation engine. The title sync seeds only a provisional
/// `saldo_em_aberto`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "fact_titulo_receber")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub omie_codigo_titulo: i64,
    pub codigo_integracao: Option<String>,
    pub cliente_id: i64,
    pub conta_corrente_id: Option<i64>,
    pub departamento_id: Option<i64>,
    pub categoria_id: Option<i64>,
    pub vendedor_id: Option<i64>,
    pub numero_documento: Option<String>,
    pub numero_parcela: Option<String>,
    pub data_emissao: Option<Date>,
    pub data_vencimento: Option<Date>,
    pub data_previsao: Option<Date>,
    pub data_registro: Option<Date>,
    pub valor_documento: f64,
    pub status_titulo: String,
    pub observacao: Option<String>,
    pub caixa_recebido: f64,
    pub desconto_concedido: f64,
    pub principal_liquidado: f64,
    pub saldo_em_aberto: f64,
    pub updated_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

const CHUNK_SIZE: usize = 500;

/// Upsert by external title code. Conflict updates cover the raw columns
/// plus the provisional balance; the other derived columns stay untouched
/// so a title re-sync never clobbers a recalculation.
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
                        Column::CodigoIntegracao,
                        Column::ClienteId,
                        Column::ContaCorrenteId,
                        Column::DepartamentoId,
                        Column::CategoriaId,
                        Column::VendedorId,
                        Column::NumeroDocumento,
                        Column::NumeroParcela,
                        Column::DataEmissao,
                        Column::DataVencimento,
                        Column::DataPrevisao,
                        Column::DataRegistro,
                        Column::ValorDocumento,
                        Column::StatusTitulo,
                        Column::Observacao,
                        Column::SaldoEmAberto,
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
            map.insert(row.omie_codigo_titulo, row.id);
        }
    }
    Ok(map)
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

/// Rewrite the four derived value columns of one title.
pub async fn update_derived(
    id: i64,
    caixa_recebido: f64,
    desconto_concedido: f64,
    principal_liquidado: f64,
    saldo_em_aberto: f64,
) -> anyhow::Result<()> {
    Entity::update_many()
        .col_expr(Column::CaixaRecebido, Expr::value(caixa_recebido))
        .col_expr(Column::DescontoConcedido, Expr::value(desconto_concedido))
        .col_expr(Column::PrincipalLiquidado, Expr::value(principal_liquidado))
        .col_expr(Column::SaldoEmAberto, Expr::value(saldo_em_aberto))
        .col_expr(Column::UpdatedAt, Expr::value(chrono::Utc::now()))
        .filter(Column::Id.eq(id))
        .exec(get_connection())
        .await?;
    Ok(())
}
