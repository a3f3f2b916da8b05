use once_cell::sync::OnceCell;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Statement};

static DB_CONN: OnceCell<DatabaseConnection> = OnceCell::new();

/// Initialize the SQLite database connection and bootstrap the star schema.
///
/// `db_path` overrides the configured path (used by tests). The connection is
/// stored in a process-wide cell; repeated calls are no-ops.
pub async fn initialize_database(db_path: Option<&str>) -> anyhow::Result<()> {
    if DB_CONN.get().is_some() {
        return Ok(());
    }

    let configured = crate::shared::config::get().database.path.clone();
    let path = db_path.unwrap_or(&configured);

    if let Some(parent) = std::path::Path::new(path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", path);
    tracing::info!("Connecting to database: {}", db_url);

    let conn = Database::connect(&db_url).await?;
    create_tables(&conn).await?;

    let _ = DB_CONN.set(conn);
    tracing::info!("Database initialized");
    Ok(())
}

pub fn get_connection() -> &'static DatabaseConnection {
    DB_CONN
        .get()
        .expect("Database not initialized. Call initialize_database() first.")
}

async fn create_tables(conn: &DatabaseConnection) -> anyhow::Result<()> {
    for ddl in SCHEMA {
        conn.execute(Statement::from_string(
            conn.get_database_backend(),
            ddl.to_string(),
        ))
        .await?;
    }
    Ok(())
}

/// Star schema: five dimensions, three fact tables, one audit table.
/// External codes from the ERP are unique per table; surrogate `id` keys
/// carry the fact-to-dimension references.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS dim_cliente (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        omie_codigo INTEGER NOT NULL UNIQUE,
        codigo_integracao TEXT,
        razao_social TEXT NOT NULL,
        nome_fantasia TEXT,
        cnpj_cpf TEXT,
        cidade TEXT,
        estado TEXT,
        email TEXT,
        telefone TEXT,
        ativo INTEGER NOT NULL DEFAULT 1,
        updated_at TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS dim_conta_corrente (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        omie_codigo INTEGER NOT NULL UNIQUE,
        descricao TEXT NOT NULL,
        tipo TEXT,
        banco TEXT,
        agencia TEXT,
        numero_conta TEXT,
        ativo INTEGER NOT NULL DEFAULT 1,
        updated_at TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS dim_departamento (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        omie_codigo TEXT NOT NULL UNIQUE,
        descricao TEXT NOT NULL,
        ativo INTEGER NOT NULL DEFAULT 1,
        updated_at TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS dim_categoria (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        omie_codigo TEXT NOT NULL UNIQUE,
        descricao TEXT NOT NULL,
        descricao_padrao TEXT,
        ativo INTEGER NOT NULL DEFAULT 1,
        updated_at TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS dim_vendedor (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        omie_codigo INTEGER NOT NULL UNIQUE,
        nome TEXT NOT NULL,
        email TEXT,
        ativo INTEGER NOT NULL DEFAULT 1,
        updated_at TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS fact_titulo_receber (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        omie_codigo_titulo INTEGER NOT NULL UNIQUE,
        codigo_integracao TEXT,
        cliente_id INTEGER NOT NULL REFERENCES dim_cliente(id),
        conta_corrente_id INTEGER REFERENCES dim_conta_corrente(id),
        departamento_id INTEGER REFERENCES dim_departamento(id),
        categoria_id INTEGER REFERENCES dim_categoria(id),
        vendedor_id INTEGER REFERENCES dim_vendedor(id),
        numero_documento TEXT,
        numero_parcela TEXT,
        data_emissao TEXT,
        data_vencimento TEXT,
        data_previsao TEXT,
        data_registro TEXT,
        valor_documento REAL NOT NULL,
        status_titulo TEXT NOT NULL,
        observacao TEXT,
        caixa_recebido REAL NOT NULL DEFAULT 0,
        desconto_concedido REAL NOT NULL DEFAULT 0,
        principal_liquidado REAL NOT NULL DEFAULT 0,
        saldo_em_aberto REAL NOT NULL DEFAULT 0,
        updated_at TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS fact_recebimento (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        omie_codigo_titulo INTEGER NOT NULL UNIQUE,
        titulo_id INTEGER REFERENCES fact_titulo_receber(id),
        conta_corrente_id INTEGER REFERENCES dim_conta_corrente(id),
        data_baixa TEXT,
        valor_baixado REAL NOT NULL DEFAULT 0,
        valor_desconto REAL NOT NULL DEFAULT 0,
        valor_juros REAL NOT NULL DEFAULT 0,
        valor_multa REAL NOT NULL DEFAULT 0,
        tipo_baixa TEXT,
        liquidado INTEGER NOT NULL DEFAULT 0,
        updated_at TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS fact_extrato_cc (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        omie_codigo_movimento INTEGER NOT NULL UNIQUE,
        conta_corrente_id INTEGER REFERENCES dim_conta_corrente(id),
        data_movimento TEXT,
        descricao TEXT,
        tipo TEXT,
        valor REAL NOT NULL DEFAULT 0,
        saldo REAL,
        updated_at TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS audit_sync_runs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        entity TEXT NOT NULL,
        started_at TEXT NOT NULL,
        finished_at TEXT,
        status TEXT NOT NULL,
        records_fetched INTEGER NOT NULL DEFAULT 0,
        records_upserted INTEGER NOT NULL DEFAULT 0,
        last_sync_cursor TEXT,
        error_message TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_titulo_cliente ON fact_titulo_receber(cliente_id)",
    "CREATE INDEX IF NOT EXISTS idx_titulo_vencimento ON fact_titulo_receber(data_vencimento)",
    "CREATE INDEX IF NOT EXISTS idx_recebimento_titulo ON fact_recebimento(titulo_id)",
    "CREATE INDEX IF NOT EXISTS idx_audit_entity ON audit_sync_runs(entity, status)",
];

#[cfg(test)]
pub async fn initialize_test_database() {
    // A file-backed database: ":memory:" gives every pooled connection its
    // own empty database, which breaks multi-statement tests.
    let path = format!(
        "target/test-db/test-{}.db",
        std::process::id()
    );
    initialize_database(Some(&path))
        .await
        .expect("test database init");
}
