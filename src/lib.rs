//! Write-through S3 proxy.
//!
//! Clients speak the S3 API to this process using dummy credentials. Each
//! request is re-signed with the real main-store credentials and forwarded
//! in its original addressing style; the primary's response is relayed back
//! verbatim. Successful mutating operations additionally spawn a detached
//! task that records the object in a relational inventory and replays the
//! operation against a mirror endpoint for disaster recovery.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
