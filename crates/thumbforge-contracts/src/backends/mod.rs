mod registry;

pub use registry::{BackendRegistry, BackendRole, BackendSpec};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Per-request routing outcome. Lives only as long as the job run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub backend: String,
    pub fallback: String,
    pub reason: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl RoutingDecision {
    pub fn append_reason(&mut self, reason: &str) {
        let reason = reason.trim();
        if reason.is_empty() {
            return;
        }
        if self.reason.trim().is_empty() {
            self.reason = reason.to_string();
        } else {
            self.reason = format!("{} {reason}", self.reason);
        }
    }
}
