pub mod u601_sync_dimensions;
pub mod u602_sync_titulos;
pub mod u603_sync_recebimentos;
pub mod u604_sync_extrato;
pub mod u605_recalc_metricas;
pub mod u606_sync_orchestrator;
