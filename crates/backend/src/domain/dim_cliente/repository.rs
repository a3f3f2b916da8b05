use std::collections::HashMap;

use sea_orm::entity::prelude::*;
use sea_orm::sea_query::OnConflict;
use sea_orm::PaginatorTrait;
use serde::{Deserialize, Serialize};

use crate::shared::data::db::get_connection;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "dim_cliente")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub omie_codigo: i64,
    pub codigo_integracao: Option<String>,
    pub razao_social: String,
    pub nome_fantasia: Option<String>,
    pub cnpj_cpf: Option<String>,
    pub cidade: Option<String>,
    pub estado: Option<String>,
    pub email: Option<String>,
    pub telefone: Option<String>,
    pub ativo: bool,
    pub updated_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

const CHUNK_SIZE: usize = 500;

/// Insert or update by external code, in chunks. Returns rows written.
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
                        Column::CodigoIntegracao,
                        Column::RazaoSocial,
                        Column::NomeFantasia,
                        Column::CnpjCpf,
                        Column::Cidade,
                        Column::Estado,
                        Column::Email,
                        Column::Telefone,
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

/// External code -> surrogate id, for FK resolution during fact syncs.
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

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::Set;

    fn row(codigo: i64, nome: &str) -> ActiveModel {
        ActiveModel {
            omie_codigo: Set(codigo),
            razao_social: Set(nome.to_string()),
            ativo: Set(true),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_on_external_code() {
        crate::shared::data::db::initialize_test_database().await;

        upsert_batch(vec![row(910_001, "Empresa Original")]).await.unwrap();
        upsert_batch(vec![row(910_001, "Empresa Atualizada"), row(910_002, "Outra")])
            .await
            .unwrap();

        let found = Entity::find()
            .filter(Column::OmieCodigo.is_in([910_001, 910_002]))
            .all(get_connection())
            .await
            .unwrap();
        assert_eq!(found.len(), 2);

        let first = found.iter().find(|m| m.omie_codigo == 910_001).unwrap();
        assert_eq!(first.razao_social, "Empresa Atualizada");

        let map = lookup_by_codigo().await.unwrap();
        assert_eq!(map.get(&910_001), Some(&first.id));
    }

    #[tokio::test]
    async fn test_empty_batch_is_a_noop() {
        crate::shared::data::db::initialize_test_database().await;
        assert_eq!(upsert_batch(Vec::new()).await.unwrap(), 0);
    }
}
