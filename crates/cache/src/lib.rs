pub mod error;

pub use error::{Error, Result};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use faststr::FastStr;
use serde::de::DeserializeOwned;
use source::{Subscription, TreeEvent, TreePath, ValueSource};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Keyed async resource cache over a push-based [`ValueSource`].
///
/// The first `get(key)` registers a value subscription on `root/<key>` and
/// every later `get` for that key shares it; the source is subscribed at
/// most once per key for the lifetime of the cache. Waiters resolve with
/// the first snapshot delivered, an absent path included (it decodes as
/// `V::default()`, the `snap.val() || {}` convention); pushes after that
/// update what a fresh `get` returns, but never mutate values already
/// handed out.
///
/// Entries are never evicted and never unsubscribed.
pub struct ResourceCache<S, V> {
    source:  S,
    root:    TreePath,
    entries: Arc<DashMap<FastStr, CacheEntry<V>>>,
}

struct CacheEntry<V> {
    rx: watch::Receiver<Option<V>>,
}

impl<S, V> Clone for ResourceCache<S, V>
where
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            source:  self.source.clone(),
            root:    self.root.clone(),
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<S, V> ResourceCache<S, V>
where
    S: ValueSource,
    V: DeserializeOwned + Default + Clone + Send + Sync + 'static,
{
    pub fn new(source: S, root: TreePath) -> Self {
        Self {
            source,
            root,
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Latest known value for `key`, subscribing on first use.
    ///
    /// Suspends until the source delivers a first snapshot; a snapshot of
    /// an absent path resolves as `V::default()`. If the key is already
    /// resolved this returns immediately with the latest cached value.
    /// Fails with [`Error::SourceUnavailable`] when the subscription is
    /// refused or closes before anything arrives. A source that stays
    /// silent leaves the future pending; no timeout is imposed here.
    pub async fn get(&self, key: impl Into<FastStr>) -> Result<V> {
        let key = key.into();
        let mut rx = self.entry_rx(&key)?;

        if let Some(value) = (*rx.borrow()).clone() {
            return Ok(value);
        }
        match rx.wait_for(|latest| latest.is_some()).await {
            Ok(resolved) => (*resolved)
                .clone()
                .ok_or_else(|| Error::SourceUnavailable(key)),
            Err(_) => Err(Error::SourceUnavailable(key)),
        }
    }

    /// Latest resolved value without subscribing or waiting.
    pub fn peek(&self, key: &str) -> Option<V> {
        self.entries
            .get(key)
            .and_then(|entry| (*entry.rx.borrow()).clone())
    }

    /// Keys a subscription has been registered for, resolved or not.
    pub fn cached_keys(&self) -> Vec<FastStr> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    // The entry API serializes check-then-create, which is what keeps the
    // subscription count at one per key under concurrent first lookups.
    fn entry_rx(&self, key: &FastStr) -> Result<watch::Receiver<Option<V>>> {
        if let Some(entry) = self.entries.get(key) {
            return Ok(entry.rx.clone());
        }
        match self.entries.entry(key.clone()) {
            Entry::Occupied(occupied) => Ok(occupied.get().rx.clone()),
            Entry::Vacant(vacant) => {
                let sub = self.source.watch_value(&self.root.child(key.clone()))?;
                let (tx, rx) = watch::channel(None);
                debug!(key = %key, "registering resource subscription");
                tokio::spawn(pump(sub, tx, key.clone()));
                vacant.insert(CacheEntry { rx: rx.clone() });
                Ok(rx)
            }
        }
    }
}

/// Drives one subscription into its entry's watch cell.
async fn pump<V>(mut sub: Subscription, tx: watch::Sender<Option<V>>, key: FastStr)
where
    V: DeserializeOwned + Default + Send + Sync + 'static,
{
    while let Some(event) = sub.recv().await {
        let TreeEvent::Value(value) = event else {
            continue;
        };
        match value {
            // An absent path is still a delivered snapshot; it resolves
            // waiters with the default record.
            None => {
                let _ = tx.send(Some(V::default()));
            }
            Some(raw) => match serde_json::from_value::<V>(raw) {
                Ok(decoded) => {
                    let _ = tx.send(Some(decoded));
                }
                Err(err) => warn!(key = %key, %err, "skipping undecodable payload"),
            },
        }
    }
    // Sender drops here; unresolved waiters observe SourceUnavailable.
    debug!(key = %key, "resource subscription closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::join_all;
    use serde::Deserialize;
    use serde_json::json;
    use source::{MemorySource, ValueSink};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::{sleep, timeout};

    #[derive(Debug, Clone, Default, PartialEq, Deserialize)]
    struct Profile {
        name: FastStr,
    }

    fn users_path() -> TreePath {
        TreePath::parse("users").unwrap()
    }

    fn user(key: &str) -> TreePath {
        users_path().child(FastStr::new(key))
    }

    fn cache(source: &MemorySource) -> ResourceCache<MemorySource, Profile> {
        ResourceCache::new(source.clone(), users_path())
    }

    async fn settle() {
        // Let spawned pump tasks drain their channels.
        sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn concurrent_gets_register_one_subscription() {
        let source = MemorySource::new();
        // A payload the profile type rejects keeps resolution open.
        source.put(&user("alice"), json!("placeholder")).unwrap();
        let cache = cache(&source);

        let pending: Vec<_> = (0..3)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get("alice").await })
            })
            .collect();

        while source.subscriber_count(&user("alice")) == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(source.subscriber_count(&user("alice")), 1);

        source.put(&user("alice"), json!({"name": "Alice"})).unwrap();

        for resolved in join_all(pending).await {
            assert_eq!(resolved.unwrap().unwrap().name, "Alice");
        }
        assert_eq!(source.subscriber_count(&user("alice")), 1);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let source = MemorySource::new();
        source.put(&user("alice"), json!("placeholder")).unwrap();
        source.put(&user("bob"), json!({"name": "Bob"})).unwrap();
        let cache = cache(&source);

        let k1 = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get("alice").await })
        };
        assert_eq!(cache.get("bob").await.unwrap().name, "Bob");

        // Resolving bob must not touch alice's pending future.
        assert!(timeout(Duration::from_millis(50), k1).await.is_err());
        assert_eq!(source.subscriber_count(&user("alice")), 1);
        assert_eq!(source.subscriber_count(&user("bob")), 1);
    }

    #[tokio::test]
    async fn absent_path_resolves_with_default_record() {
        let source = MemorySource::new();
        let cache = cache(&source);

        assert!(cache.peek("nobody").is_none());
        let resolved = timeout(Duration::from_secs(1), cache.get("nobody"))
            .await
            .expect("absent snapshot should resolve, not pend")
            .unwrap();
        assert!(resolved.name.is_empty());
        assert_eq!(cache.peek("nobody"), Some(Profile::default()));
        assert_eq!(source.subscriber_count(&user("nobody")), 1);

        // The entry stays live: a record appearing later reaches fresh gets.
        source.put(&user("nobody"), json!({"name": "Norah"})).unwrap();
        settle().await;
        assert_eq!(cache.get("nobody").await.unwrap().name, "Norah");
    }

    #[tokio::test]
    async fn resolved_key_answers_immediately_without_resubscribing() {
        let source = MemorySource::new();
        source.put(&user("bob"), json!({"name": "Bob"})).unwrap();
        let cache = cache(&source);

        assert_eq!(cache.get("bob").await.unwrap().name, "Bob");
        for _ in 0..5 {
            assert_eq!(cache.get("bob").await.unwrap().name, "Bob");
        }
        assert_eq!(source.subscriber_count(&user("bob")), 1);
        assert_eq!(cache.cached_keys(), ["bob"]);
    }

    #[tokio::test]
    async fn later_push_updates_fresh_gets_only() {
        let source = MemorySource::new();
        source.put(&user("bob"), json!({"name": "Bob"})).unwrap();
        let cache = cache(&source);

        let first = cache.get("bob").await.unwrap();
        assert_eq!(first.name, "Bob");

        source
            .put(&user("bob"), json!({"name": "Bob Smith"}))
            .unwrap();
        settle().await;

        // The value handed out earlier is untouched; a fresh get sees the
        // latest push.
        assert_eq!(first.name, "Bob");
        assert_eq!(cache.get("bob").await.unwrap().name, "Bob Smith");
        assert_eq!(source.subscriber_count(&user("bob")), 1);
    }

    #[tokio::test]
    async fn undecodable_payload_is_skipped() {
        let source = MemorySource::new();
        source.put(&user("eve"), json!({"name": {"no": "str"}})).unwrap();
        let cache = cache(&source);

        let pending = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get("eve").await })
        };
        settle().await;

        // Bad payload neither resolves nor kills the entry; a good push
        // still gets through.
        source.put(&user("eve"), json!({"name": "Eve"})).unwrap();
        assert_eq!(pending.await.unwrap().unwrap().name, "Eve");
    }

    /// Source whose subscriptions close without ever delivering.
    #[derive(Clone, Default)]
    struct DeadSource;

    impl ValueSource for DeadSource {
        fn watch_value(&self, _path: &TreePath) -> source::Result<Subscription> {
            let (_tx, rx) = mpsc::unbounded_channel();
            Ok(Subscription::new(1, rx))
        }

        fn watch_children(&self, path: &TreePath) -> source::Result<Subscription> {
            self.watch_value(path)
        }

        fn unsubscribe(&self, _id: source::SubscriptionId) {}
    }

    #[tokio::test]
    async fn dropped_subscription_surfaces_source_unavailable() {
        let cache: ResourceCache<DeadSource, Profile> =
            ResourceCache::new(DeadSource, users_path());

        match cache.get("alice").await {
            Err(Error::SourceUnavailable(key)) => assert_eq!(key, "alice"),
            other => panic!("expected SourceUnavailable, got {other:?}"),
        }
    }
}
