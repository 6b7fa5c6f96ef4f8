//! Data models

pub mod resources;
pub mod spec;
pub mod task;
