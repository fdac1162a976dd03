//! Data models for the object inventory.
//!
//! One table per observed bucket; each row maps cleanly via
//! `sqlx::FromRow` and serializes naturally as JSON via `serde`.

pub mod object_record;
