use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

/// One append-only feed entry.
#[derive(Debug, Clone)]
pub struct Activity {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub actor_id: Uuid,
    pub activity_type: String,
    pub target_type: Option<String>,
    pub target_id: Option<String>,
    pub metadata_json: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewActivity {
    pub actor_id: Uuid,
    pub activity_type: String,
    pub target_type: Option<String>,
    pub target_id: Option<String>,
    /// `mentionedUserIds` inside here fans out MENTION events.
    pub metadata_json: Value,
}

impl NewActivity {
    pub fn mentioned_user_ids(&self) -> Vec<Uuid> {
        self.metadata_json
            .get("mentionedUserIds")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str())
                    .filter_map(|s| Uuid::parse_str(s).ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ActivityFilter {
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub actor_id: Option<Uuid>,
    pub limit: i64,
    pub offset: i64,
}
