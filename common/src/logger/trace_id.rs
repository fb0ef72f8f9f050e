use uuid::Uuid;

/// Correlation id carried from an inbound request or bus event through
/// every span and event it causes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceId(Uuid);

impl TraceId {
    pub fn new(v: Uuid) -> Self {
        Self(v)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn to_field(&self) -> String {
        self.0.as_hyphenated().to_string()
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self(Uuid::new_v4())
    }
}
