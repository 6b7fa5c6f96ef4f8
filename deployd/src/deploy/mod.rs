//! Deployment module

pub mod app_pipeline;
pub mod cleanup;
pub mod collaborators;
pub mod context;
pub mod database_pipeline;
pub mod docker;
pub mod engine;
pub mod git;
pub mod locks;
pub mod log_store;
pub mod phases;
pub mod ports;
pub mod proxy;
pub mod tracker;

pub use engine::{DeploymentEngine, EngineSettings};
