use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Website {
    pub id: String,
    pub name: String,
    /// Hostname beacons may originate from; `None` accepts any origin
    pub domain: Option<String>,
    pub created_at: i64,
}
