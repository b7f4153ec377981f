use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Parameters attached to a placement, in insertion order. Values are arbitrary JSON.
pub type Parameters = serde_json::Map<String, serde_json::Value>;

/// A named application event that may lead to a paywall.
///
/// A placement is immutable once created. Its `id` is generated at creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    id: String,
    name: String,
    parameters: Parameters,
    created_at: DateTime<Utc>,
}

impl Placement {
    /// Create a placement for an event fired now.
    pub fn new(name: impl Into<String>, parameters: Parameters) -> Placement {
        Placement {
            id: format!("{:032x}", rand::random::<u128>()),
            name: name.into(),
            parameters,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
