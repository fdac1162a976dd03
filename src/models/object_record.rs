//! Represents one observed object in a bucket's inventory table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row in a per-bucket inventory table.
///
/// Rows are created on the first successful PUT/POST observed for a key and
/// updated in place afterwards; DELETE only flips `deleted` (soft delete),
/// so the row doubles as the object's history marker.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ObjectRecord {
    /// Monotonically assigned row id (`SERIAL`).
    pub id: i32,

    /// The S3 object key, verbatim. Unique per table.
    pub path: String,

    /// Bytes written by the most recent observed PUT/POST.
    pub size: i64,

    /// Content type of the most recent write; never empty
    /// (defaults to `application/octet-stream`).
    pub content_type: String,

    /// False on every upsert, true once the mirror write for that
    /// generation succeeded. Advisory under concurrent writers.
    pub is_backed_up: bool,

    /// Set on every upsert and on soft-delete.
    pub last_modified: DateTime<Utc>,

    /// True iff the most recent observed operation was a DELETE.
    pub deleted: bool,

    /// Maintained by the store.
    pub created_at: Option<DateTime<Utc>>,

    /// Maintained by the store; last-writer-wins tiebreaker.
    pub updated_at: Option<DateTime<Utc>>,
}
