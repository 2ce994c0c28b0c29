use faststr::FastStr;
use serde_json::Value;

/// Event delivered on a [`crate::Subscription`].
#[derive(Debug, Clone, PartialEq)]
pub enum TreeEvent {
    /// Full snapshot of the watched path; `None` when the path is absent.
    Value(Option<Value>),
    ChildAdded { key: FastStr, value: Value },
    ChildChanged { key: FastStr, value: Value },
    ChildRemoved { key: FastStr },
}
