pub mod error;

mod event;
mod memory;
mod path;

pub use error::{Error, Result};
pub use event::TreeEvent;
pub use memory::MemorySource;
pub use path::TreePath;

use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

pub type SubscriptionId = u64;

/// A live registration against a [`ValueSource`] path.
///
/// Carries an explicit id so callers can detach through
/// [`ValueSource::unsubscribe`] instead of matching callbacks by identity.
/// Dropping the subscription also detaches it: the source prunes
/// registrations whose receiver is gone on the next delivery attempt.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<TreeEvent>,
}

impl Subscription {
    /// Pair an id with its event receiver. Source implementations call this
    /// at registration time.
    pub fn new(id: SubscriptionId, rx: mpsc::UnboundedReceiver<TreeEvent>) -> Self {
        Self { id, rx }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next event, or `None` once the source has dropped this registration.
    pub async fn recv(&mut self) -> Option<TreeEvent> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`Subscription::recv`]. Deliveries happen
    /// synchronously inside source mutations, so this is deterministic right
    /// after a write.
    pub fn try_recv(&mut self) -> Option<TreeEvent> {
        self.rx.try_recv().ok()
    }

    pub fn into_stream(self) -> UnboundedReceiverStream<TreeEvent> {
        UnboundedReceiverStream::new(self.rx)
    }
}

/// Push-based data store boundary: watch a tree path, get the current state
/// immediately, then every later change.
pub trait ValueSource: Clone + Send + Sync + 'static {
    /// Snapshot subscription: delivers `TreeEvent::Value` with the current
    /// value right away (including `None` for an absent path), then again on
    /// every change affecting the path's subtree.
    fn watch_value(&self, path: &TreePath) -> Result<Subscription>;

    /// Membership subscription: replays every existing direct child as
    /// `ChildAdded`, then streams `ChildAdded` / `ChildChanged` /
    /// `ChildRemoved` for later membership changes.
    fn watch_children(&self, path: &TreePath) -> Result<Subscription>;

    fn unsubscribe(&self, id: SubscriptionId);
}

/// Write half of a source, kept separate because subscribers only ever need
/// [`ValueSource`].
pub trait ValueSink: Clone + Send + Sync + 'static {
    /// Replace the value at `path`, creating intermediate nodes. Writing
    /// `Value::Null` is equivalent to [`ValueSink::remove`].
    fn put(&self, path: &TreePath, value: serde_json::Value) -> Result<()>;

    /// Delete the subtree at `path`; empty parents are pruned.
    fn remove(&self, path: &TreePath) -> Result<()>;
}
