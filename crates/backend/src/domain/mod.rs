pub mod audit_sync_runs;
pub mod dim_categoria;
pub mod dim_cliente;
pub mod dim_conta_corrente;
pub mod dim_departamento;
pub mod dim_vendedor;
pub mod fact_extrato_cc;
pub mod fact_recebimento;
pub mod fact_titulo_receber;
