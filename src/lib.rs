pub mod context;
pub mod database_ops;
pub mod env_boot;
pub mod error;
pub mod normalization;
pub mod tracing;

pub mod util {
    pub mod env;
}

pub use context::CatalogContext;
pub use error::{CatalogError, CatalogResult};
