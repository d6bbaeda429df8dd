use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The only namespace in use today. Namespaces are an extension point,
/// so the mirror and queue carry them as plain strings.
pub const RESOURCE_NAMESPACE: &str = "resource";

pub const NODE: &str = "node";
pub const DEVICE: &str = "device";
pub const SOURCE: &str = "source";
pub const FLOW: &str = "flow";
pub const SENDER: &str = "sender";
pub const RECEIVER: &str = "receiver";

/// Dependency order for bulk re-registration. The node itself goes
/// first via its own path; types not listed here follow afterwards.
pub const REGISTRATION_ORDER: [&str; 5] = [DEVICE, SOURCE, FLOW, SENDER, RECEIVER];

/// Wire envelope for the Registration API: `{"type": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceEnvelope {
    #[serde(rename = "type")]
    pub type_: String,
    pub data: Value,
}

impl ResourceEnvelope {
    pub fn new<S: Into<String>>(type_: S, data: Value) -> Self {
        ResourceEnvelope {
            type_: type_.into(),
            data,
        }
    }

    /// The `id` field of the payload, when present and a string.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.data.get("id").and_then(Value::as_str)
    }

    /// The envelope as sent to the Registration API.
    #[must_use]
    pub fn to_wire(&self) -> Value {
        serde_json::json!({ "type": self.type_, "data": self.data })
    }
}
