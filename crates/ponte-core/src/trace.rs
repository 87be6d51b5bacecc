use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Correlation token threaded through every bus operation.
///
/// `trace_id` identifies the whole causal chain (one per top-level send or
/// publish); `frame_id` identifies a single hop; `parent_frame_id` links a
/// hop to the frame that caused it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TraceInfo {
    pub trace_id: Uuid,
    pub frame_id: Uuid,
    pub parent_frame_id: Option<Uuid>,
    pub caller: String,
}

impl TraceInfo {
    /// Start a new trace at a top-level call site.
    pub fn root(caller: impl Into<String>) -> Self {
        Self {
            trace_id: Uuid::now_v7(),
            frame_id: Uuid::now_v7(),
            parent_frame_id: None,
            caller: caller.into(),
        }
    }

    /// Derive a child frame within the same trace.
    pub fn child(&self, caller: impl Into<String>) -> Self {
        Self {
            trace_id: self.trace_id,
            frame_id: Uuid::now_v7(),
            parent_frame_id: Some(self.frame_id),
            caller: caller.into(),
        }
    }
}
