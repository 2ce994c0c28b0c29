use crate::error::{Error, Result};
use crate::event::TreeEvent;
use crate::path::TreePath;
use crate::{Subscription, SubscriptionId, ValueSink, ValueSource};
use faststr::FastStr;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// In-memory [`ValueSource`] / [`ValueSink`] over a single JSON tree.
///
/// All fan-out happens synchronously inside the mutating call while the tree
/// lock is held, so a subscriber never misses a write between its initial
/// snapshot and later deliveries. Senders whose receiver is gone are pruned
/// on the next delivery attempt.
#[derive(Clone, Default)]
pub struct MemorySource {
    state: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    tree:    Value,
    subs:    HashMap<SubscriptionId, Registration>,
    next_id: SubscriptionId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchKind {
    Value,
    Children,
}

struct Registration {
    path: TreePath,
    kind: WatchKind,
    tx:   mpsc::UnboundedSender<TreeEvent>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value at `path`, `None` when absent.
    pub fn read(&self, path: &TreePath) -> Option<Value> {
        value_at(&self.lock().tree, path).cloned()
    }

    /// Live registrations watching exactly `path` (any kind).
    pub fn subscriber_count(&self, path: &TreePath) -> usize {
        self.lock()
            .subs
            .values()
            .filter(|reg| reg.path == *path)
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn register(&self, path: &TreePath, kind: WatchKind) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        state.next_id += 1;
        let id = state.next_id;

        // Initial delivery happens under the lock: no write can slip in
        // between the snapshot and the registration.
        match kind {
            WatchKind::Value => {
                let _ = tx.send(TreeEvent::Value(value_at(&state.tree, path).cloned()));
            }
            WatchKind::Children => {
                for (key, value) in children_of(value_at(&state.tree, path)) {
                    let _ = tx.send(TreeEvent::ChildAdded { key, value });
                }
            }
        }

        state.subs.insert(
            id,
            Registration {
                path: path.clone(),
                kind,
                tx,
            },
        );
        trace!(%path, id, ?kind, "subscription registered");
        Subscription { id, rx }
    }

    fn mutate(&self, path: &TreePath, new_value: Option<Value>) -> Result<()> {
        if path.is_root() {
            return Err(Error::RootWrite);
        }

        let mut state = self.lock();
        let state = &mut *state;

        // Snapshot the before-state of every registration whose subtree
        // overlaps the written path.
        let mut pending: Vec<(SubscriptionId, Before)> = Vec::new();
        for (&id, reg) in &state.subs {
            match reg.kind {
                WatchKind::Value if reg.path.contains(path) || path.contains(&reg.path) => {
                    pending.push((id, Before::Value(value_at(&state.tree, &reg.path).cloned())));
                }
                WatchKind::Children
                    if (reg.path.contains(path) && path.depth() > reg.path.depth())
                        || path.contains(&reg.path) =>
                {
                    pending.push((
                        id,
                        Before::Children(children_of(value_at(&state.tree, &reg.path))),
                    ));
                }
                _ => {}
            }
        }

        match new_value {
            Some(value) => set_at(&mut state.tree, path.segments(), value),
            None => remove_at(&mut state.tree, path.segments()),
        }

        let mut dead = Vec::new();
        for (id, before) in pending {
            let Some(reg) = state.subs.get(&id) else {
                continue;
            };
            let delivered = match before {
                Before::Value(old) => {
                    let now = value_at(&state.tree, &reg.path).cloned();
                    if now == old {
                        Ok(())
                    } else {
                        reg.tx.send(TreeEvent::Value(now))
                    }
                }
                Before::Children(old) => {
                    let now = children_of(value_at(&state.tree, &reg.path));
                    send_child_diff(&reg.tx, old, now)
                }
            };
            if delivered.is_err() {
                dead.push(id);
            }
        }
        for id in dead {
            state.subs.remove(&id);
            debug!(id, "pruned subscription with dropped receiver");
        }
        Ok(())
    }
}

enum Before {
    Value(Option<Value>),
    Children(BTreeMap<FastStr, Value>),
}

impl ValueSource for MemorySource {
    fn watch_value(&self, path: &TreePath) -> Result<Subscription> {
        Ok(self.register(path, WatchKind::Value))
    }

    fn watch_children(&self, path: &TreePath) -> Result<Subscription> {
        Ok(self.register(path, WatchKind::Children))
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if self.lock().subs.remove(&id).is_some() {
            trace!(id, "subscription removed");
        }
    }
}

impl ValueSink for MemorySource {
    fn put(&self, path: &TreePath, value: Value) -> Result<()> {
        // A null write is a removal, same as the tree never holding nulls.
        let value = if value.is_null() { None } else { Some(value) };
        self.mutate(path, value)
    }

    fn remove(&self, path: &TreePath) -> Result<()> {
        self.mutate(path, None)
    }
}

type SendOutcome = std::result::Result<(), mpsc::error::SendError<TreeEvent>>;

fn send_child_diff(
    tx: &mpsc::UnboundedSender<TreeEvent>,
    old: BTreeMap<FastStr, Value>,
    now: BTreeMap<FastStr, Value>,
) -> SendOutcome {
    for key in old.keys() {
        if !now.contains_key(key) {
            tx.send(TreeEvent::ChildRemoved { key: key.clone() })?;
        }
    }
    for (key, value) in now {
        match old.get(&key) {
            None => tx.send(TreeEvent::ChildAdded { key, value })?,
            Some(previous) if *previous != value => {
                tx.send(TreeEvent::ChildChanged { key, value })?
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Resolve `path` inside `root`. Null nodes count as absent.
fn value_at<'a>(root: &'a Value, path: &TreePath) -> Option<&'a Value> {
    let mut node = root;
    for segment in path.segments() {
        node = node.as_object()?.get(segment.as_str())?;
    }
    if node.is_null() { None } else { Some(node) }
}

/// Direct children of an object node, nulls skipped.
fn children_of(node: Option<&Value>) -> BTreeMap<FastStr, Value> {
    match node.and_then(Value::as_object) {
        Some(map) => map
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (FastStr::new(k), v.clone()))
            .collect(),
        None => BTreeMap::new(),
    }
}

/// Replace the value at `segments`, turning non-object intermediates into
/// objects along the way. Callers guarantee `segments` is non-empty.
fn set_at(root: &mut Value, segments: &[FastStr], value: Value) {
    if !root.is_object() {
        *root = Value::Object(serde_json::Map::new());
    }
    if let Some(map) = root.as_object_mut() {
        let key = segments[0].to_string();
        if segments.len() == 1 {
            map.insert(key, value);
        } else {
            let child = map.entry(key).or_insert(Value::Null);
            set_at(child, &segments[1..], value);
        }
    }
}

/// Remove the subtree at `segments`, pruning parents left empty.
fn remove_at(root: &mut Value, segments: &[FastStr]) {
    let Some(map) = root.as_object_mut() else {
        return;
    };
    let key = segments[0].as_str();
    if segments.len() == 1 {
        map.remove(key);
    } else if let Some(child) = map.get_mut(key) {
        remove_at(child, &segments[1..]);
        let empty = child.as_object().is_some_and(|m| m.is_empty()) || child.is_null();
        if empty {
            map.remove(key);
        }
    }
    if map.is_empty() {
        *root = Value::Null;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(raw: &str) -> TreePath {
        TreePath::parse(raw).unwrap()
    }

    #[test]
    fn value_watch_delivers_current_state_immediately() {
        let source = MemorySource::new();
        source.put(&path("users/chuck"), json!({"name": "Chuck"})).unwrap();

        let mut present = source.watch_value(&path("users/chuck")).unwrap();
        assert_eq!(
            present.try_recv(),
            Some(TreeEvent::Value(Some(json!({"name": "Chuck"}))))
        );

        let mut absent = source.watch_value(&path("users/nobody")).unwrap();
        assert_eq!(absent.try_recv(), Some(TreeEvent::Value(None)));
    }

    #[test]
    fn descendant_write_resnapshots_ancestor_watch() {
        let source = MemorySource::new();
        source.put(&path("users/chuck"), json!({"name": "Chuck"})).unwrap();

        let mut sub = source.watch_value(&path("users/chuck")).unwrap();
        let _ = sub.try_recv();

        source.put(&path("users/chuck/name"), json!("Carlos")).unwrap();
        assert_eq!(
            sub.try_recv(),
            Some(TreeEvent::Value(Some(json!({"name": "Carlos"}))))
        );
    }

    #[test]
    fn unrelated_write_is_silent() {
        let source = MemorySource::new();
        let mut sub = source.watch_value(&path("users/chuck")).unwrap();
        let _ = sub.try_recv();

        source.put(&path("groups/techies"), json!({"name": "Techies"})).unwrap();
        assert_eq!(sub.try_recv(), None);
    }

    #[test]
    fn unchanged_snapshot_is_not_redelivered() {
        let source = MemorySource::new();
        source.put(&path("users/chuck/name"), json!("Chuck")).unwrap();

        let mut sub = source.watch_value(&path("users/chuck")).unwrap();
        let _ = sub.try_recv();

        source.put(&path("users/chuck/name"), json!("Chuck")).unwrap();
        assert_eq!(sub.try_recv(), None);
    }

    #[test]
    fn children_watch_replays_then_diffs() {
        let source = MemorySource::new();
        let index = path("users/chuck/groups");
        source.put(&index.child("alpha"), json!(true)).unwrap();
        source.put(&index.child("beta"), json!(true)).unwrap();

        let mut sub = source.watch_children(&index).unwrap();
        assert_eq!(
            sub.try_recv(),
            Some(TreeEvent::ChildAdded {
                key:   "alpha".into(),
                value: json!(true),
            })
        );
        assert_eq!(
            sub.try_recv(),
            Some(TreeEvent::ChildAdded {
                key:   "beta".into(),
                value: json!(true),
            })
        );

        source.put(&index.child("gamma"), json!(true)).unwrap();
        assert_eq!(
            sub.try_recv(),
            Some(TreeEvent::ChildAdded {
                key:   "gamma".into(),
                value: json!(true),
            })
        );

        source.put(&index.child("alpha"), json!(false)).unwrap();
        assert_eq!(
            sub.try_recv(),
            Some(TreeEvent::ChildChanged {
                key:   "alpha".into(),
                value: json!(false),
            })
        );

        source.remove(&index.child("beta")).unwrap();
        assert_eq!(
            sub.try_recv(),
            Some(TreeEvent::ChildRemoved { key: "beta".into() })
        );
        assert_eq!(sub.try_recv(), None);
    }

    #[test]
    fn null_write_acts_as_removal() {
        let source = MemorySource::new();
        let index = path("users/chuck/groups");
        source.put(&index.child("alpha"), json!(true)).unwrap();

        let mut sub = source.watch_children(&index).unwrap();
        let _ = sub.try_recv();

        source.put(&index.child("alpha"), Value::Null).unwrap();
        assert_eq!(
            sub.try_recv(),
            Some(TreeEvent::ChildRemoved {
                key: "alpha".into()
            })
        );
        assert_eq!(source.read(&index.child("alpha")), None);
    }

    #[test]
    fn removal_prunes_empty_parents() {
        let source = MemorySource::new();
        source.put(&path("a/b/c"), json!(1)).unwrap();
        source.remove(&path("a/b/c")).unwrap();

        assert_eq!(source.read(&path("a")), None);
        assert_eq!(source.read(&TreePath::root()), None);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let source = MemorySource::new();
        let mut sub = source.watch_value(&path("users/chuck")).unwrap();
        let _ = sub.try_recv();

        source.unsubscribe(sub.id());
        source.put(&path("users/chuck"), json!({"name": "Chuck"})).unwrap();
        assert_eq!(sub.try_recv(), None);
        assert_eq!(source.subscriber_count(&path("users/chuck")), 0);
    }

    #[test]
    fn dropped_receiver_is_pruned_on_next_write() {
        let source = MemorySource::new();
        let target = path("users/chuck");
        let sub = source.watch_value(&target).unwrap();
        assert_eq!(source.subscriber_count(&target), 1);

        drop(sub);
        source.put(&target, json!({"name": "Chuck"})).unwrap();
        assert_eq!(source.subscriber_count(&target), 0);
    }

    #[test]
    fn root_write_is_rejected() {
        let source = MemorySource::new();
        assert!(matches!(
            source.put(&TreePath::root(), json!({})),
            Err(Error::RootWrite)
        ));
    }
}
