use crate::error::Result;
use crate::event::MirrorEvent;
use crate::feed::GroupFeed;
use cache::ResourceCache;
use common::data::UserProfile;
use faststr::FastStr;
use serde_json::Value;
use source::{Subscription, SubscriptionId, TreeEvent, TreePath, ValueSink, ValueSource};
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const EVENT_BUFFER: usize = 64;

/// Mirrors a user's membership index (`users/<user>/groups`) against the
/// normalized `groups` / `messages` / `users` subtrees.
///
/// Index children drive everything: an added key attaches a [`GroupFeed`],
/// a removed key detaches it. Nothing polls; listeners attach themselves to
/// the data, so index writers need no knowledge of who is mirroring.
pub struct MembershipMirror;

impl MembershipMirror {
    /// Start mirroring for `user`. Returns the control handle and the event
    /// stream; dropping the receiver stops the mirror's emission loops.
    pub fn spawn<S: ValueSource>(
        source: S,
        user: impl Into<FastStr>,
    ) -> Result<(MirrorHandle<S>, mpsc::Receiver<MirrorEvent>)> {
        let user = user.into();
        let users_root = TreePath::root().child("users");
        let index = users_root.child(user.clone()).child("groups");

        let index_sub = source.watch_children(&index)?;
        let index_id = index_sub.id();
        let users = ResourceCache::new(source.clone(), users_root);

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        info!(user = %user, index = %index, "membership mirror starting");
        let task = tokio::spawn(run_index_loop(
            source.clone(),
            users,
            index_sub,
            events_tx,
            shutdown_rx,
        ));

        let handle = MirrorHandle {
            user,
            index,
            source,
            index_id,
            shutdown: Some(shutdown_tx),
            task,
        };
        Ok((handle, events_rx))
    }
}

/// Control surface of a running mirror.
pub struct MirrorHandle<S: ValueSource> {
    user:     FastStr,
    index:    TreePath,
    source:   S,
    index_id: SubscriptionId,
    shutdown: Option<oneshot::Sender<()>>,
    task:     JoinHandle<()>,
}

impl<S: ValueSource> MirrorHandle<S> {
    pub fn user(&self) -> &FastStr {
        &self.user
    }

    /// Detach the index subscription and wait for the mirror to wind down.
    pub async fn shutdown(mut self) {
        self.source.unsubscribe(self.index_id);
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = self.task.await;
    }
}

impl<S: ValueSource + ValueSink> MirrorHandle<S> {
    /// Add a group to the membership index. There is nobody to notify:
    /// mirrors are already listening on the index path.
    pub fn join_group(&self, group: impl Into<FastStr>) -> Result<()> {
        self.source
            .put(&self.index.child(group.into()), Value::Bool(true))?;
        Ok(())
    }

    /// Drop a group from the membership index.
    pub fn leave_group(&self, group: impl Into<FastStr>) -> Result<()> {
        self.source.remove(&self.index.child(group.into()))?;
        Ok(())
    }
}

async fn run_index_loop<S: ValueSource>(
    source: S,
    users: ResourceCache<S, UserProfile>,
    mut index_sub: Subscription,
    events: mpsc::Sender<MirrorEvent>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let groups_root = TreePath::root().child("groups");
    let messages_root = TreePath::root().child("messages");
    let mut feeds: HashMap<FastStr, GroupFeed> = HashMap::new();

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = index_sub.recv() => {
                let Some(event) = event else { break };
                match event {
                    TreeEvent::ChildAdded { key, .. } => {
                        if feeds.contains_key(&key) {
                            continue;
                        }
                        let feed = GroupFeed::spawn(
                            &source,
                            &users,
                            key.clone(),
                            groups_root.child(key.clone()),
                            messages_root.child(key.clone()),
                            events.clone(),
                        );
                        match feed {
                            Ok(feed) => {
                                debug!(group = %feed.key(), "group feed attached");
                                feeds.insert(key, feed);
                            }
                            Err(err) => warn!(group = %key, %err, "failed to attach group feed"),
                        }
                    }
                    TreeEvent::ChildRemoved { key } => {
                        if let Some(feed) = feeds.remove(&key) {
                            feed.detach(&source);
                            if events.send(MirrorEvent::GroupLeft { key }).await.is_err() {
                                break;
                            }
                        }
                    }
                    // Index entries are plain membership markers; value
                    // changes on them carry no information.
                    TreeEvent::ChildChanged { .. } | TreeEvent::Value(_) => {}
                }
            }
        }
    }

    for (_, feed) in feeds.drain() {
        feed.detach(&source);
    }
    debug!("membership mirror stopped");
}
