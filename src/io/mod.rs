//! Scene sources and run configuration documents

pub mod catalog;
pub mod params;

pub use catalog::SceneCatalog;
pub use params::{RunConfig, RunConfigReader};
