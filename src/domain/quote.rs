use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A stored quotation. `index` is assigned once at submission time, starts at 1
/// and never gets reused; deleting a quote leaves a gap in the index space.
/// Only approved quotes are eligible for random selection.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Quote {
    pub id: Uuid,
    pub index: i64,
    pub text: String,
    pub author: String,
    pub area: String,
    pub approved: bool,
    pub submitted_at: DateTime<Utc>,
}
