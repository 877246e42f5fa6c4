//! Agebox Core - Shared functionality for the agebox tool
//!
//! Where things live on disk and how a box is configured.

pub mod config;
pub mod paths;

pub use config::BoxConfig;
pub use paths::Paths;
