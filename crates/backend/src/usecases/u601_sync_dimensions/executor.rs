//! Dimension synchronization: customers, bank accounts, departments,
//! categories and sellers, fetched in full on every run.

use chrono::Utc;
use contracts::sync::{DimensionSyncResult, SyncPageResult, SyncRunStatus};
use sea_orm::Set;
use serde_json::json;

use crate::domain::audit_sync_runs::repository as audit;
use crate::domain::{
    dim_categoria, dim_cliente, dim_conta_corrente, dim_departamento, dim_vendedor,
};
use crate::shared::omie::client::OmieApiClient;
use crate::shared::omie::endpoints;
use crate::shared::omie::pagination::{self, ListConfig, PaginationStyle};
use crate::shared::omie::types::{
    is_ativo, non_empty, parse_many, OmieCategoria, OmieCliente, OmieContaCorrente,
    OmieDepartamento, OmieVendedor,
};

/// Customers can run to tens of thousands of records, so this one also
/// supports a bounded page range for chunked triggers.
pub async fn sync_clientes_pages(
    client: &OmieApiClient,
    from_page: u64,
    to_page: Option<u64>,
) -> anyhow::Result<SyncPageResult> {
    let pages = pagination::list_pages(
        client,
        &ListConfig {
            endpoint: endpoints::CLIENTES,
            call: "ListarClientes",
            params: json!({ "apenas_importado_api": "N" }),
            data_key: "clientes_cadastro",
            page_size: 200,
            style: PaginationStyle::Default,
        },
        from_page,
        to_page,
    )
    .await?;

    let total_pages = pages.total_pages;
    let last_page = pages.last_page;
    let done = pages.done();

    let batch = parse_many::<OmieCliente>(pages.records);
    let now = Utc::now();
    let rows: Vec<dim_cliente::repository::ActiveModel> = batch
        .valid
        .into_iter()
        .map(|c| dim_cliente::repository::ActiveModel {
            omie_codigo: Set(c.codigo_cliente_omie),
            codigo_integracao: Set(non_empty(c.codigo_cliente_integracao)),
            razao_social: Set(c.razao_social),
            nome_fantasia: Set(non_empty(c.nome_fantasia)),
            cnpj_cpf: Set(non_empty(c.cnpj_cpf)),
            cidade: Set(non_empty(c.cidade)),
            estado: Set(non_empty(c.estado)),
            email: Set(non_empty(c.email)),
            telefone: Set(non_empty(c.telefone1_numero)),
            ativo: Set(is_ativo(&c.inativo)),
            updated_at: Set(Some(now)),
            ..Default::default()
        })
        .collect();

    let fetched = rows.len() as u64;
    let upserted = dim_cliente::repository::upsert_batch(rows).await?;
    Ok(SyncPageResult {
        fetched,
        upserted,
        total_pages,
        last_page,
        done,
    })
}

pub async fn sync_clientes(client: &OmieApiClient) -> anyhow::Result<u64> {
    Ok(sync_clientes_pages(client, 1, None).await?.upserted)
}

pub async fn sync_contas_correntes(client: &OmieApiClient) -> anyhow::Result<u64> {
    let raw = pagination::list_all(
        client,
        &ListConfig {
            endpoint: endpoints::CONTAS_CORRENTES,
            call: "ListarContasCorrentes",
            params: json!({}),
            data_key: "ListarContasCorrentes",
            page_size: 100,
            style: PaginationStyle::Default,
        },
    )
    .await?;

    let batch = parse_many::<OmieContaCorrente>(raw);
    let now = Utc::now();
    let rows: Vec<dim_conta_corrente::repository::ActiveModel> = batch
        .valid
        .into_iter()
        .map(|c| dim_conta_corrente::repository::ActiveModel {
            omie_codigo: Set(c.n_cod_cc),
            descricao: Set(c.descricao),
            tipo: Set(non_empty(c.tipo_conta_corrente)),
            banco: Set(non_empty(c.codigo_banco)),
            agencia: Set(non_empty(c.codigo_agencia)),
            numero_conta: Set(non_empty(c.numero_conta_corrente)),
            ativo: Set(is_ativo(&c.inativo)),
            updated_at: Set(Some(now)),
            ..Default::default()
        })
        .collect();

    dim_conta_corrente::repository::upsert_batch(rows).await
}

pub async fn sync_departamentos(client: &OmieApiClient) -> anyhow::Result<u64> {
    let raw = pagination::list_all(
        client,
        &ListConfig {
            endpoint: endpoints::DEPARTAMENTOS,
            call: "ListarDepartamentos",
            params: json!({}),
            data_key: "departamentos",
            page_size: 100,
            style: PaginationStyle::Default,
        },
    )
    .await?;

    let batch = parse_many::<OmieDepartamento>(raw);
    let now = Utc::now();
    let rows: Vec<dim_departamento::repository::ActiveModel> = batch
        .valid
        .into_iter()
        .map(|d| dim_departamento::repository::ActiveModel {
            omie_codigo: Set(d.codigo),
            descricao: Set(d.descricao),
            ativo: Set(is_ativo(&d.inativo)),
            updated_at: Set(Some(now)),
            ..Default::default()
        })
        .collect();

    dim_departamento::repository::upsert_batch(rows).await
}

pub async fn sync_categorias(client: &OmieApiClient) -> anyhow::Result<u64> {
    let raw = pagination::list_all(
        client,
        &ListConfig {
            endpoint: endpoints::CATEGORIAS,
            call: "ListarCategorias",
            params: json!({}),
            data_key: "categoria_cadastro",
            page_size: 100,
            style: PaginationStyle::Default,
        },
    )
    .await?;

    let batch = parse_many::<OmieCategoria>(raw);
    let now = Utc::now();
    let rows: Vec<dim_categoria::repository::ActiveModel> = batch
        .valid
        .into_iter()
        .map(|c| dim_categoria::repository::ActiveModel {
            omie_codigo: Set(c.codigo),
            descricao: Set(c.descricao),
            descricao_padrao: Set(non_empty(c.descricao_padrao)),
            ativo: Set(is_ativo(&c.conta_inativa)),
            updated_at: Set(Some(now)),
            ..Default::default()
        })
        .collect();

    dim_categoria::repository::upsert_batch(rows).await
}

pub async fn sync_vendedores(client: &OmieApiClient) -> anyhow::Result<u64> {
    let raw = pagination::list_all(
        client,
        &ListConfig {
            endpoint: endpoints::VENDEDORES,
            call: "ListarVendedores",
            params: json!({}),
            data_key: "cadastro",
            page_size: 100,
            style: PaginationStyle::Default,
        },
    )
    .await?;

    let batch = parse_many::<OmieVendedor>(raw);
    let now = Utc::now();
    let rows: Vec<dim_vendedor::repository::ActiveModel> = batch
        .valid
        .into_iter()
        .map(|v| dim_vendedor::repository::ActiveModel {
            omie_codigo: Set(v.codigo),
            nome: Set(v.nome),
            email: Set(non_empty(v.email)),
            ativo: Set(is_ativo(&v.inativo)),
            updated_at: Set(Some(now)),
            ..Default::default()
        })
        .collect();

    dim_vendedor::repository::upsert_batch(rows).await
}

/// Fan out the five dimension syncs concurrently. Each entity reports its
/// own outcome; one failing dimension never aborts the others.
pub async fn sync_all_dimensions(client: &OmieApiClient) -> Vec<DimensionSyncResult> {
    let (clientes, contas, departamentos, categorias, vendedores) = tokio::join!(
        sync_clientes(client),
        sync_contas_correntes(client),
        sync_departamentos(client),
        sync_categorias(client),
        sync_vendedores(client),
    );

    vec![
        to_result("dim_cliente", clientes),
        to_result("dim_conta_corrente", contas),
        to_result("dim_departamento", departamentos),
        to_result("dim_categoria", categorias),
        to_result("dim_vendedor", vendedores),
    ]
}

fn to_result(entity: &str, outcome: anyhow::Result<u64>) -> DimensionSyncResult {
    match outcome {
        Ok(records) => DimensionSyncResult {
            entity: entity.to_string(),
            records,
            status: SyncRunStatus::Success,
            error: None,
        },
        Err(e) => {
            tracing::error!("Dimension sync {} failed: {:#}", entity, e);
            DimensionSyncResult {
                entity: entity.to_string(),
                records: 0,
                status: SyncRunStatus::Error,
                error: Some(format!("{e:#}")),
            }
        }
    }
}

/// Audited variant used by the orchestrator and the `dimensions` trigger.
pub async fn run(client: &OmieApiClient) -> Vec<DimensionSyncResult> {
    let run_id = audit::open_run("dimensions").await;
    let results = sync_all_dimensions(client).await;

    let total: u64 = results.iter().map(|r| r.records).sum();
    let errors: Vec<&str> = results.iter().filter_map(|r| r.error.as_deref()).collect();
    let status = if errors.is_empty() {
        SyncRunStatus::Success
    } else {
        SyncRunStatus::Error
    };
    audit::close_run(
        run_id,
        status,
        total,
        total,
        None,
        (!errors.is_empty()).then(|| errors.join(" | ")),
    )
    .await;

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::Arc;
    use std::time::Duration;

    async fn clientes_handler() -> Json<serde_json::Value> {
        Json(json!({
            "total_de_paginas": 1,
            "clientes_cadastro": [
                {"codigo_cliente_omie": 920_001, "razao_social": "ACME Ltda", "inativo": "N"},
                {"codigo_cliente_omie": 920_002, "razao_social": "Beta SA", "inativo": "S"},
                {"razao_social": "sem codigo"},
            ],
        }))
    }

    #[tokio::test]
    async fn test_sync_clientes_end_to_end() {
        crate::shared::data::db::initialize_test_database().await;

        let app = Router::new().route(endpoints::CLIENTES, post(clientes_handler));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let config = crate::shared::config::OmieConfig {
            base_url: format!("http://{addr}"),
            app_key: "key".to_string(),
            app_secret: "secret".to_string(),
        };
        let client = OmieApiClient::with_policy(
            &config,
            crate::shared::omie::client::RetryPolicy::default(),
            Arc::new(crate::shared::omie::client::RateLimiter::new(
                3,
                Duration::ZERO,
            )),
        );

        let result = sync_clientes_pages(&client, 1, None).await.unwrap();
        // The record without an external code is dropped by validation.
        assert_eq!(result.fetched, 2);
        assert!(result.done);

        let map = dim_cliente::repository::lookup_by_codigo().await.unwrap();
        assert!(map.contains_key(&920_001));
        assert!(map.contains_key(&920_002));
    }

    #[test]
    fn test_to_result_maps_failure() {
        let failure = to_result("dim_vendedor", Err(anyhow::anyhow!("HTTP 500")));
        assert_eq!(failure.status, SyncRunStatus::Error);
        assert_eq!(failure.records, 0);
        assert!(failure.error.unwrap().contains("HTTP 500"));

        let success = to_result("dim_vendedor", Ok(7));
        assert_eq!(success.status, SyncRunStatus::Success);
        assert_eq!(success.records, 7);
    }
}
