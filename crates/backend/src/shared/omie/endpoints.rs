//! Omie API endpoint paths, relative to the configured base URL.

pub const DEFAULT_BASE_URL: &str = "https://app.omie.com.br/api/v1";

pub const CONTA_RECEBER: &str = "/financas/contareceber/";
pub const MOVIMENTOS_FINANCEIROS: &str = "/financas/mf/";
pub const EXTRATO: &str = "/financas/extrato/";
pub const CLIENTES: &str = "/geral/clientes/";
pub const CONTAS_CORRENTES: &str = "/geral/contacorrente/";
pub const DEPARTAMENTOS: &str = "/geral/departamentos/";
pub const CATEGORIAS: &str = "/geral/categorias/";
pub const VENDEDORES: &str = "/geral/vendedores/";
