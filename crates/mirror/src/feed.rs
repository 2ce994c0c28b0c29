use crate::event::MirrorEvent;
use cache::ResourceCache;
use common::data::{ChatMessage, GroupRecord, UserProfile};
use faststr::FastStr;
use futures_util::StreamExt;
use source::{SubscriptionId, TreeEvent, TreePath, ValueSource};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Listeners for one joined group: a value watch on `groups/<key>` and a
/// child watch on `messages/<key>`.
///
/// The first metadata snapshot marks the feed ready and emits
/// [`MirrorEvent::GroupJoined`]; message children are enriched with the
/// author's profile from the shared user cache before they are surfaced.
pub(crate) struct GroupFeed {
    key:          FastStr,
    meta_sub:     SubscriptionId,
    messages_sub: SubscriptionId,
}

impl GroupFeed {
    pub(crate) fn spawn<S: ValueSource>(
        source: &S,
        users: &ResourceCache<S, UserProfile>,
        key: FastStr,
        meta_path: TreePath,
        messages_path: TreePath,
        events: mpsc::Sender<MirrorEvent>,
    ) -> source::Result<Self> {
        let meta = source.watch_value(&meta_path)?;
        let meta_sub = meta.id();
        let messages = source.watch_children(&messages_path)?;
        let messages_sub = messages.id();

        tokio::spawn(run_meta_loop(meta, key.clone(), events.clone()));
        tokio::spawn(run_message_loop(
            messages,
            key.clone(),
            users.clone(),
            events,
        ));

        Ok(Self {
            key,
            meta_sub,
            messages_sub,
        })
    }

    pub(crate) fn key(&self) -> &FastStr {
        &self.key
    }

    /// Detach both registrations; the loops end once their senders drop.
    pub(crate) fn detach<S: ValueSource>(self, source: &S) {
        source.unsubscribe(self.meta_sub);
        source.unsubscribe(self.messages_sub);
        debug!(group = %self.key, "group feed detached");
    }
}

async fn run_meta_loop(
    sub: source::Subscription,
    group: FastStr,
    events: mpsc::Sender<MirrorEvent>,
) {
    let mut stream = sub.into_stream();
    let mut ready = false;
    while let Some(event) = stream.next().await {
        let TreeEvent::Value(value) = event else {
            continue;
        };
        let record = match GroupRecord::from_snapshot(value) {
            Ok(record) => record,
            Err(err) => {
                warn!(group = %group, %err, "malformed group record");
                continue;
            }
        };
        if !ready {
            ready = true;
            let joined = MirrorEvent::GroupJoined {
                key:  group.clone(),
                name: record.name.clone(),
            };
            if events.send(joined).await.is_err() {
                break;
            }
        } else {
            debug!(
                group = %group,
                name = %record.name,
                members = record.members.len(),
                "group metadata updated"
            );
        }
    }
}

async fn run_message_loop<S: ValueSource>(
    sub: source::Subscription,
    group: FastStr,
    users: ResourceCache<S, UserProfile>,
    events: mpsc::Sender<MirrorEvent>,
) {
    let mut stream = sub.into_stream();
    while let Some(event) = stream.next().await {
        let TreeEvent::ChildAdded { key, value } = event else {
            continue;
        };
        let message: ChatMessage = match serde_json::from_value(value) {
            Ok(message) => message,
            Err(err) => {
                warn!(group = %group, message = %key, %err, "malformed message");
                continue;
            }
        };
        // Join the author's display name in from the user cache; the cache
        // subscribes at most once per author no matter how chatty they are.
        let author = match users.get(message.user.clone()).await {
            Ok(profile) => profile.name,
            Err(err) => {
                warn!(user = %message.user, %err, "could not resolve author");
                continue;
            }
        };
        let event = MirrorEvent::Message {
            group: group.clone(),
            author,
            message,
        };
        if events.send(event).await.is_err() {
            break;
        }
    }
}
