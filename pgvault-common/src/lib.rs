//! Shared foundation of the pgvault services: the persistent job queue, the
//! control-database models, the object-store client, and the ambient
//! plumbing (config, health, metrics) both binaries build on.

pub mod config;
pub mod error;
pub mod health;
pub mod layout;
pub mod metrics;
pub mod models;
pub mod queue;
pub mod retry;
pub mod store;
pub mod types;
