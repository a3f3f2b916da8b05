use serde::{Deserialize, Serialize};

/// Request body for the step-selecting sync trigger endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerSyncRequest {
    /// Which sync step to run.
    pub step: SyncStep,

    /// First page to fetch (1-based). Defaults to 1.
    #[serde(default)]
    pub from_page: Option<u64>,

    /// Last page to fetch (inclusive). Unset means "until the last page".
    #[serde(default)]
    pub to_page: Option<u64>,
}

/// The sync steps addressable from the trigger endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStep {
    Clientes,
    ContasCorrentes,
    Departamentos,
    Categorias,
    Vendedores,

    /// All five dimensions, fanned out concurrently.
    Dimensions,

    Titulos,
    Recebimentos,
    Extrato,
    Recalc,

    /// The full orchestrated sequence.
    All,
}

impl SyncStep {
    /// Name used in audit records and error messages.
    pub fn entity_name(self) -> &'static str {
        match self {
            Self::Clientes => "dim_cliente",
            Self::ContasCorrentes => "dim_conta_corrente",
            Self::Departamentos => "dim_departamento",
            Self::Categorias => "dim_categoria",
            Self::Vendedores => "dim_vendedor",
            Self::Dimensions => "dimensions",
            Self::Titulos => "fact_titulo_receber",
            Self::Recebimentos => "fact_recebimento",
            Self::Extrato => "fact_extrato_cc",
            Self::Recalc => "recalc_metricas",
            Self::All => "full_sync",
        }
    }
}
