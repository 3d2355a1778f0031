//! Watch-backed local cache of cluster objects.
//!
//! A [`ResourceCache`] mirrors one resource type. Its synchronization task
//! lists everything once, applies incremental watch events, restarts the watch
//! every resync interval to re-list from scratch, and backs off on failures.
//! Readers only ever touch the in-memory map.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::time::Duration;

use error_stack::Report;
use futures::StreamExt;
use kube::runtime::watcher;
use kube::Api;
use kube::Client;
use kube::Resource;
use kube::ResourceExt;
use serde::de::DeserializeOwned;
use tokio::select;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::k8s::KubernetesError;
use crate::k8s::ListScope;
use crate::k8s::Lister;
use crate::metrics::MetricsRecorder;

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

struct CacheState<K> {
    resource: &'static str,
    objects: RwLock<HashMap<String, Arc<K>>>,
    synced: AtomicBool,
    consecutive_errors: AtomicU32,
}

/// Shared handle to the cached objects of one resource type.
pub struct ResourceCache<K> {
    state: Arc<CacheState<K>>,
}

impl<K> Clone for ResourceCache<K> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

fn object_key<K: Resource>(obj: &K) -> String {
    match obj.namespace() {
        Some(namespace) => format!("{namespace}/{}", obj.name_any()),
        None => obj.name_any(),
    }
}

impl<K> ResourceCache<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default,
{
    /// Creates an empty, not yet synced cache with no synchronization task.
    pub fn new(resource: &'static str) -> Self {
        Self {
            state: Arc::new(CacheState {
                resource,
                objects: RwLock::new(HashMap::new()),
                synced: AtomicBool::new(false),
                consecutive_errors: AtomicU32::new(0),
            }),
        }
    }

    /// Creates a cache that already holds a complete listing of `objects`.
    pub fn with_objects(resource: &'static str, objects: Vec<K>) -> Self {
        let cache = Self::new(resource);
        cache.apply(watcher::Event::Restarted(objects));
        cache
    }

    /// Starts mirroring the objects selected by `scope`.
    ///
    /// The returned task runs until `token` is cancelled and must be awaited by
    /// the owner during shutdown.
    pub fn spawn(
        client: Client,
        resource: &'static str,
        scope: ListScope,
        resync_interval: Duration,
        metrics: Arc<MetricsRecorder>,
        token: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let cache = Self::new(resource);
        let handle = cache.start_sync(client, scope, resync_interval, metrics, token);
        (cache, handle)
    }

    fn start_sync(
        &self,
        client: Client,
        scope: ListScope,
        resync_interval: Duration,
        metrics: Arc<MetricsRecorder>,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let resource = self.resource();
        let sync = CacheSync {
            api: Api::all(client),
            config: scope.watcher_config(),
            resync_interval,
            cache: self.clone(),
            metrics,
        };
        tokio::spawn(async move {
            info!("Starting {resource} cache synchronization");
            sync.run(token).await;
            info!("{resource} cache synchronization stopped");
        })
    }

    pub fn resource(&self) -> &'static str {
        self.state.resource
    }

    /// Applies one watch event to the local state.
    ///
    /// A `Restarted` event carries a full listing and replaces the state
    /// wholesale, which also drops objects whose deletion was missed.
    pub fn apply(&self, event: watcher::Event<K>) {
        let mut objects = self
            .state
            .objects
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match event {
            watcher::Event::Applied(obj) => {
                objects.insert(object_key(&obj), Arc::new(obj));
            }
            watcher::Event::Deleted(obj) => {
                objects.remove(&object_key(&obj));
            }
            watcher::Event::Restarted(listing) => {
                *objects = listing
                    .into_iter()
                    .map(|obj| (object_key(&obj), Arc::new(obj)))
                    .collect();
                if !self.state.synced.swap(true, Ordering::AcqRel) {
                    info!(
                        resource = self.state.resource,
                        objects = objects.len(),
                        "initial listing complete, cache synced"
                    );
                }
            }
        }
    }

    /// Applies an event received from a healthy watch, which ends any run of
    /// failures. Returns whether the event was a full listing.
    fn apply_watched(&self, event: watcher::Event<K>) -> bool {
        let relisted = matches!(event, watcher::Event::Restarted(_));
        self.apply(event);
        self.state.consecutive_errors.store(0, Ordering::Release);
        relisted
    }

    /// Watch failures since the last successful event
    pub fn consecutive_errors(&self) -> u32 {
        self.state.consecutive_errors.load(Ordering::Acquire)
    }

    /// Number of cached objects
    pub fn len(&self) -> usize {
        self.state
            .objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K> Lister<K> for ResourceCache<K>
where
    K: Send + Sync,
{
    fn list(&self) -> Result<Vec<Arc<K>>, Report<KubernetesError>> {
        let objects = self
            .state
            .objects
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(objects.values().cloned().collect())
    }

    fn has_synced(&self) -> bool {
        self.state.synced.load(Ordering::Acquire)
    }
}

/// Delay before the next watch attempt after `errors` consecutive failures:
/// doubling from [`INITIAL_BACKOFF`], capped at [`MAX_BACKOFF`].
fn backoff_delay(errors: u32) -> Duration {
    let exponent = errors.saturating_sub(1).min(16);
    INITIAL_BACKOFF.saturating_mul(1 << exponent).min(MAX_BACKOFF)
}

struct CacheSync<K> {
    api: Api<K>,
    config: watcher::Config,
    resync_interval: Duration,
    cache: ResourceCache<K>,
    metrics: Arc<MetricsRecorder>,
}

impl<K> CacheSync<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default,
{
    #[tracing::instrument(skip(self, token), fields(resource = self.cache.resource()))]
    async fn run(self, token: CancellationToken) {
        loop {
            select! {
                _ = token.cancelled() => {
                    info!("Cache synchronization shutdown requested");
                    break;
                }
                result = self.watch_until_resync() => {
                    match result {
                        Ok(()) => {
                            debug!("Resync interval elapsed, re-listing");
                        }
                        Err(e) => {
                            let errors = self.cache.state.consecutive_errors.fetch_add(1, Ordering::AcqRel) + 1;
                            self.metrics.record_cache_sync(
                                self.cache.resource(),
                                self.cache.has_synced(),
                                self.cache.len(),
                                errors,
                            );
                            let delay = backoff_delay(errors);
                            error!("Watch failed ({errors} consecutive), retrying in {delay:?}: {e:?}");
                            select! {
                                _ = token.cancelled() => {
                                    info!("Cache synchronization shutdown requested during backoff");
                                    break;
                                }
                                _ = tokio::time::sleep(delay) => {}
                            }
                        }
                    }
                }
            }
        }
    }

    /// Runs one watch session until the resync interval elapses or the
    /// stream fails. Each session starts with a full listing.
    async fn watch_until_resync(&self) -> Result<(), Report<KubernetesError>> {
        let mut stream = watcher::watcher(self.api.clone(), self.config.clone()).boxed();
        let resync = tokio::time::sleep(self.resync_interval);
        tokio::pin!(resync);

        loop {
            select! {
                _ = &mut resync => return Ok(()),
                event = stream.next() => match event {
                    Some(Ok(event)) => {
                        if self.cache.apply_watched(event) {
                            self.metrics.record_cache_sync(
                                self.cache.resource(),
                                true,
                                self.cache.len(),
                                0,
                            );
                        }
                    }
                    Some(Err(e)) => {
                        return Err(Report::new(KubernetesError::WatchFailed {
                            resource: self.cache.resource(),
                            message: format!("Watch stream error: {e}"),
                        }));
                    }
                    None => {
                        warn!("Watch stream ended unexpectedly, restarting");
                        return Ok(());
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::Node;
    use k8s_openapi::api::core::v1::Pod;
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::k8s::resources::fixtures::node;
    use crate::k8s::resources::fixtures::pod;

    fn names<K: Resource>(cache: &ResourceCache<K>) -> Vec<String>
    where
        K: Send + Sync,
    {
        let mut names: Vec<String> = cache
            .list()
            .unwrap()
            .iter()
            .map(|obj| obj.name_any())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn not_synced_until_initial_listing() {
        let cache: ResourceCache<Node> = ResourceCache::new("nodes");
        cache.apply(watcher::Event::Applied(node("n1", &[], "1", "1Gi")));

        assert!(!cache.has_synced());
        assert_eq!(names(&cache), vec!["n1".to_string()]);

        cache.apply(watcher::Event::Restarted(vec![
            node("n1", &[], "1", "1Gi"),
            node("n2", &[], "1", "1Gi"),
        ]));
        assert!(cache.has_synced());
        assert_eq!(names(&cache), vec!["n1".to_string(), "n2".to_string()]);
    }

    #[test]
    fn incremental_events_update_and_remove_objects() {
        let cache = ResourceCache::with_objects("pods", vec![pod("a", None, "1", "1Gi")]);

        cache.apply(watcher::Event::Applied(pod("b", Some("n1"), "1", "1Gi")));
        cache.apply(watcher::Event::Applied(pod("a", Some("n2"), "2", "1Gi")));
        assert_eq!(cache.len(), 2);

        cache.apply(watcher::Event::Deleted(pod("b", Some("n1"), "1", "1Gi")));
        let pods = cache.list().unwrap();
        assert_eq!(pods.len(), 1);
        assert_eq!(
            pods[0].spec.as_ref().unwrap().node_name.as_deref(),
            Some("n2")
        );
    }

    #[test]
    fn relisting_drops_missed_deletions_and_stays_synced() {
        let cache = ResourceCache::with_objects(
            "pods",
            vec![pod("a", None, "1", "1Gi"), pod("b", None, "1", "1Gi")],
        );

        cache.apply(watcher::Event::Restarted(vec![pod("b", None, "1", "1Gi")]));

        assert!(cache.has_synced());
        assert_eq!(names(&cache), vec!["b".to_string()]);
    }

    #[test]
    fn namespaced_objects_are_keyed_by_namespace() {
        let mut other = pod("a", None, "1", "1Gi");
        other.metadata.namespace = Some("kube-system".to_string());
        let cache: ResourceCache<Pod> =
            ResourceCache::with_objects("pods", vec![pod("a", None, "1", "1Gi"), other]);

        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        assert_eq!(backoff_delay(1), Duration::from_millis(500));
        assert_eq!(backoff_delay(2), Duration::from_secs(1));
        assert_eq!(backoff_delay(3), Duration::from_secs(2));
        assert_eq!(backoff_delay(10), MAX_BACKOFF);
        assert_eq!(backoff_delay(u32::MAX), MAX_BACKOFF);
    }

    #[test]
    fn healthy_event_clears_failure_count() {
        let cache: ResourceCache<Node> = ResourceCache::new("nodes");
        cache.state.consecutive_errors.store(3, Ordering::Release);

        assert!(!cache.apply_watched(watcher::Event::Applied(node("n1", &[], "1", "1Gi"))));
        assert_eq!(cache.consecutive_errors(), 0);
        assert!(cache.apply_watched(watcher::Event::Restarted(vec![])));
    }

    fn unreachable_client() -> Client {
        let config = kube::Config::new("http://127.0.0.1:1".parse().unwrap());
        Client::try_from(config).unwrap()
    }

    async fn wait_for_errors<K>(cache: &ResourceCache<K>, at_least: u32)
    where
        K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
        K::DynamicType: Default,
    {
        tokio::time::timeout(Duration::from_secs(10), async {
            while cache.consecutive_errors() < at_least {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("watch failures should be counted");
    }

    #[test(tokio::test)]
    async fn failing_watch_stays_unsynced_and_stops_on_cancel() {
        let token = CancellationToken::new();
        let (cache, handle) = ResourceCache::<Node>::spawn(
            unreachable_client(),
            "nodes",
            ListScope::All,
            Duration::from_secs(3600),
            Arc::new(MetricsRecorder::new("influx")),
            token.clone(),
        );

        wait_for_errors(&cache, 2).await;
        assert!(!cache.has_synced());
        assert!(cache.list().unwrap().is_empty());

        // lands in the backoff wait most of the time
        token.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("sync task should stop promptly")
            .unwrap();
    }

    #[test(tokio::test)]
    async fn failing_watch_keeps_serving_last_listing() {
        let cache = ResourceCache::with_objects(
            "pods",
            vec![pod("a", None, "1", "1Gi"), pod("b", None, "1", "1Gi")],
        );
        let token = CancellationToken::new();
        let handle = cache.start_sync(
            unreachable_client(),
            ListScope::All,
            Duration::from_secs(3600),
            Arc::new(MetricsRecorder::new("influx")),
            token.clone(),
        );

        wait_for_errors(&cache, 1).await;
        assert!(cache.has_synced());
        assert_eq!(names(&cache), vec!["a".to_string(), "b".to_string()]);

        token.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("sync task should stop promptly")
            .unwrap();
    }

    #[tokio::test]
    async fn concurrent_readers_see_whole_listings() {
        let cache: ResourceCache<Node> = ResourceCache::new("nodes");
        let writer = cache.clone();

        let write = tokio::spawn(async move {
            for round in 0..200 {
                let listing = (0..10)
                    .map(|i| node(&format!("n{round}-{i}"), &[], "1", "1Gi"))
                    .collect();
                writer.apply(watcher::Event::Restarted(listing));
                tokio::task::yield_now().await;
            }
        });

        for _ in 0..200 {
            let nodes = cache.list().unwrap();
            assert!(nodes.is_empty() || nodes.len() == 10);
            tokio::task::yield_now().await;
        }
        write.await.unwrap();
    }
}
