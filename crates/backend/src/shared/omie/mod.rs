pub mod client;
pub mod endpoints;
pub mod pagination;
pub mod types;
