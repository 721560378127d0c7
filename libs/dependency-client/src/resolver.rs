use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell, RwLock};

use stream_api::{DependencyClient, DependencyKind, FormatDefinition, FormatId, StreamError};

/// In-progress fetches keyed by id; concurrent misses share one cell.
type Flights<T> = Mutex<HashMap<FormatId, Arc<OnceCell<Arc<T>>>>>;

/// Caching front of a [`DependencyClient`] for data formats and Atlas configurations.
///
/// Resolved documents are immutable: the first value cached for an id is
/// the one every later caller gets. Nothing is evicted; the cache lives as
/// long as the client. Concurrent misses on one id issue a single fetch.
pub struct DataFormatClient {
    dependencies: Arc<dyn DependencyClient>,
    formats: RwLock<HashMap<FormatId, Arc<FormatDefinition>>>,
    format_flights: Flights<FormatDefinition>,
    /// Reverse index so an already known definition is never re-registered.
    format_ids: RwLock<HashMap<FormatDefinition, FormatId>>,
    atlas_configurations: RwLock<HashMap<FormatId, Arc<serde_json::Value>>>,
    atlas_ids: RwLock<HashMap<String, FormatId>>,
    atlas_flights: Flights<serde_json::Value>,
}

impl std::fmt::Debug for DataFormatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataFormatClient").finish_non_exhaustive()
    }
}

impl DataFormatClient {
    pub fn new(dependencies: Arc<dyn DependencyClient>) -> Self {
        Self {
            dependencies,
            formats: RwLock::new(HashMap::new()),
            format_flights: Mutex::new(HashMap::new()),
            format_ids: RwLock::new(HashMap::new()),
            atlas_configurations: RwLock::new(HashMap::new()),
            atlas_ids: RwLock::new(HashMap::new()),
            atlas_flights: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a data format by hash. Network I/O only on a cache miss.
    pub async fn resolve(&self, id: &FormatId) -> Result<Arc<FormatDefinition>, StreamError> {
        if let Some(def) = self.cached_format(id).await {
            return Ok(def);
        }
        single_flight(&self.format_flights, id, || self.fetch_format(id)).await
    }

    async fn fetch_format(&self, id: &FormatId) -> Result<Arc<FormatDefinition>, StreamError> {
        // Another flight may have finished between the cache check and this one starting.
        if let Some(def) = self.cached_format(id).await {
            return Ok(def);
        }

        let document = self.dependencies.get(DependencyKind::DataFormat, id).await?;
        let def: FormatDefinition = serde_json::from_value(document)
            .map_err(|e| StreamError::unresolved(id, format!("invalid data format document: {e}")))?;

        let def = self.cache_format(id, def).await;
        tracing::debug!(format = %id, feeds = def.feeds.len(), "resolved data format");
        Ok(def)
    }

    async fn cached_format(&self, id: &FormatId) -> Option<Arc<FormatDefinition>> {
        self.formats.read().await.get(id).cloned()
    }

    /// Register a definition with the dependency server, once per distinct definition.
    pub async fn register(&self, def: &FormatDefinition) -> Result<FormatId, StreamError> {
        if let Some(id) = self.format_ids.read().await.get(def) {
            return Ok(id.clone());
        }

        let document = serde_json::to_value(def).map_err(|e| StreamError::encode(e.to_string()))?;
        let id = self.dependencies.put(DependencyKind::DataFormat, &document).await?;
        self.cache_format(&id, def.clone()).await;
        tracing::debug!(format = %id, feeds = def.feeds.len(), "registered data format");
        Ok(id)
    }

    /// Resolve an opaque Atlas configuration document by hash.
    pub async fn resolve_atlas_configuration(&self, id: &FormatId) -> Result<Arc<serde_json::Value>, StreamError> {
        if let Some(doc) = self.atlas_configurations.read().await.get(id) {
            return Ok(doc.clone());
        }
        single_flight(&self.atlas_flights, id, || self.fetch_atlas_configuration(id)).await
    }

    async fn fetch_atlas_configuration(&self, id: &FormatId) -> Result<Arc<serde_json::Value>, StreamError> {
        if let Some(doc) = self.atlas_configurations.read().await.get(id) {
            return Ok(doc.clone());
        }
        let document = self.dependencies.get(DependencyKind::AtlasConfiguration, id).await?;
        let mut guard = self.atlas_configurations.write().await;
        Ok(guard.entry(id.clone()).or_insert_with(|| Arc::new(document)).clone())
    }

    pub async fn register_atlas_configuration(&self, document: &serde_json::Value) -> Result<FormatId, StreamError> {
        let fingerprint = document.to_string();
        if let Some(id) = self.atlas_ids.read().await.get(&fingerprint) {
            return Ok(id.clone());
        }

        let id = self.dependencies.put(DependencyKind::AtlasConfiguration, document).await?;
        self.atlas_ids.write().await.insert(fingerprint, id.clone());
        self.atlas_configurations
            .write()
            .await
            .entry(id.clone())
            .or_insert_with(|| Arc::new(document.clone()));
        Ok(id)
    }

    /// Number of cached data formats.
    pub async fn cached_formats(&self) -> usize {
        self.formats.read().await.len()
    }

    async fn cache_format(&self, id: &FormatId, def: FormatDefinition) -> Arc<FormatDefinition> {
        self.format_ids
            .write()
            .await
            .entry(def.clone())
            .or_insert_with(|| id.clone());
        let mut guard = self.formats.write().await;
        guard.entry(id.clone()).or_insert_with(|| Arc::new(def)).clone()
    }
}

/// Run `fetch` once for all callers that miss on `id` at the same time.
/// A failed fetch is not remembered: the next caller tries again.
async fn single_flight<T, F, Fut>(flights: &Flights<T>, id: &FormatId, fetch: F) -> Result<Arc<T>, StreamError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Arc<T>, StreamError>>,
{
    let cell = flights.lock().await.entry(id.clone()).or_default().clone();
    let result = cell.get_or_try_init(fetch).await.cloned();

    let mut guard = flights.lock().await;
    if guard.get(id).is_some_and(|current| Arc::ptr_eq(current, &cell)) {
        guard.remove(id);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryDependencyClient;
    use std::pin::Pin;

    /// Yields once before every read so concurrent callers interleave.
    struct YieldingStore(Arc<MemoryDependencyClient>);

    impl DependencyClient for YieldingStore {
        fn get(
            &self,
            kind: DependencyKind,
            id: &FormatId,
        ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, StreamError>> + Send + '_>> {
            let id = id.clone();
            Box::pin(async move {
                tokio::task::yield_now().await;
                self.0.get(kind, &id).await
            })
        }

        fn put(
            &self,
            kind: DependencyKind,
            document: &serde_json::Value,
        ) -> Pin<Box<dyn Future<Output = Result<FormatId, StreamError>> + Send + '_>> {
            self.0.put(kind, document)
        }
    }

    fn engine_format() -> FormatDefinition {
        FormatDefinition::single_feed("", vec!["nEngine".into(), "vCar".into()])
    }

    #[tokio::test]
    async fn resolve_hits_cache_on_second_call() {
        let store = Arc::new(MemoryDependencyClient::new());
        let id = store
            .put(DependencyKind::DataFormat, &serde_json::to_value(engine_format()).unwrap())
            .await
            .unwrap();

        let client = DataFormatClient::new(store.clone());
        let first = client.resolve(&id).await.unwrap();
        let second = client.resolve(&id).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*first, engine_format());
        assert_eq!(store.get_count(), 1);
    }

    #[tokio::test]
    async fn register_is_idempotent_and_seeds_cache() {
        let store = Arc::new(MemoryDependencyClient::new());
        let client = DataFormatClient::new(store.clone());

        let a = client.register(&engine_format()).await.unwrap();
        let b = client.register(&engine_format()).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.put_count(), 1);

        client.resolve(&a).await.unwrap();
        assert_eq!(store.get_count(), 0);
    }

    #[tokio::test]
    async fn resolved_format_is_not_registered_again() {
        let store = Arc::new(MemoryDependencyClient::new());
        let id = store
            .put(DependencyKind::DataFormat, &serde_json::to_value(engine_format()).unwrap())
            .await
            .unwrap();
        let client = DataFormatClient::new(store.clone());

        client.resolve(&id).await.unwrap();
        assert_eq!(client.register(&engine_format()).await.unwrap(), id);
        assert_eq!(store.put_count(), 1);
    }

    #[tokio::test]
    async fn unknown_and_invalid_documents_are_unresolved() {
        let store = Arc::new(MemoryDependencyClient::new());
        store
            .insert(DependencyKind::DataFormat, FormatId::new("bad"), serde_json::json!({"feeds": 3}))
            .await;
        let client = DataFormatClient::new(store);

        let err = client.resolve(&FormatId::new("missing")).await.unwrap_err();
        assert!(matches!(err, StreamError::UnresolvedFormat { ref id, .. } if id == "missing"));

        let err = client.resolve(&FormatId::new("bad")).await.unwrap_err();
        assert!(matches!(err, StreamError::UnresolvedFormat { ref id, .. } if id == "bad"));
        assert_eq!(client.cached_formats().await, 0);
    }

    #[tokio::test]
    async fn atlas_configuration_cached() {
        let store = Arc::new(MemoryDependencyClient::new());
        let client = DataFormatClient::new(store.clone());
        let doc = serde_json::json!({"displays": ["Speed"]});

        let id = client.register_atlas_configuration(&doc).await.unwrap();
        assert_eq!(client.register_atlas_configuration(&doc).await.unwrap(), id);
        assert_eq!(*client.resolve_atlas_configuration(&id).await.unwrap(), doc);
        assert_eq!(store.put_count(), 1);
        assert_eq!(store.get_count(), 0);
    }

    #[tokio::test]
    async fn concurrent_misses_fetch_once() {
        let store = Arc::new(MemoryDependencyClient::new());
        let id = store
            .put(DependencyKind::DataFormat, &serde_json::to_value(engine_format()).unwrap())
            .await
            .unwrap();
        let atlas = store
            .put(DependencyKind::AtlasConfiguration, &serde_json::json!({"displays": []}))
            .await
            .unwrap();
        let client = DataFormatClient::new(Arc::new(YieldingStore(store.clone())));

        let (a, b, c) = tokio::join!(client.resolve(&id), client.resolve(&id), client.resolve(&id));
        let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());
        assert!(Arc::ptr_eq(&a, &b) && Arc::ptr_eq(&b, &c));
        assert_eq!(store.get_count(), 1);

        let (x, y) = tokio::join!(
            client.resolve_atlas_configuration(&atlas),
            client.resolve_atlas_configuration(&atlas)
        );
        assert!(Arc::ptr_eq(&x.unwrap(), &y.unwrap()));
        assert_eq!(store.get_count(), 2);
        assert!(client.format_flights.lock().await.is_empty());
    }

    #[tokio::test]
    async fn failed_resolve_is_retried() {
        let store = Arc::new(MemoryDependencyClient::new());
        let client = DataFormatClient::new(Arc::new(YieldingStore(store.clone())));
        let id = FormatId::new("late");

        assert!(client.resolve(&id).await.is_err());
        store
            .insert(DependencyKind::DataFormat, id.clone(), serde_json::to_value(engine_format()).unwrap())
            .await;
        assert_eq!(*client.resolve(&id).await.unwrap(), engine_format());
        assert_eq!(store.get_count(), 2);
    }
}
