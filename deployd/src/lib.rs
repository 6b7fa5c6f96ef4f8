//! Deployd Library
//!
//! Application deployment and database provisioning engine for the server
//! panel: builds Git repositories into containers, provisions database
//! containers, and tracks every run as a pollable task.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod server;
pub mod storage;
pub mod store;
pub mod utils;
