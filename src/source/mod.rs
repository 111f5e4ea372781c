//! Data sources and their process-wide registry.

mod data_source;
mod registry;

pub use data_source::{DataSource, DataSourceBuilder, DataSourceSettings, DEFAULT_ISOLATION};
pub use registry::{DataSourceRegistry, Environment};
