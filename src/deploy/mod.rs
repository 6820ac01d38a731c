//! Concrete provisioning pipelines

pub mod dao;

pub use dao::{dao_graph, dao_pipeline, PIPELINE_NAME};
