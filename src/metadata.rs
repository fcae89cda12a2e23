use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-event metadata persisted next to the payload.
///
/// Correlation and causation ids link an event to the commit that produced it; free-form
/// headers carry anything else, notably the trace context (`traceparent`) that the commit
/// publisher extracts when forwarding events downstream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    correlation_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    causation_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    headers: HashMap<String, String>,
}

impl Metadata {
    /// Header key under which the W3C trace context travels.
    pub const TRACEPARENT: &'static str = "traceparent";

    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata stamped with a fresh correlation id. Used for every commit that does not
    /// carry caller-supplied metadata.
    pub fn correlated() -> Self {
        Self {
            correlation_id: Some(Uuid::new_v4()),
            causation_id: None,
            headers: HashMap::new(),
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn caused_by(mut self, causation_id: Uuid) -> Self {
        self.causation_id = Some(causation_id);
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn correlation_id(&self) -> Option<Uuid> {
        self.correlation_id
    }

    pub fn causation_id(&self) -> Option<Uuid> {
        self.causation_id
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }
}
