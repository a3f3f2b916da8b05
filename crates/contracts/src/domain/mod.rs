pub mod status;

pub use status::StatusTitulo;
