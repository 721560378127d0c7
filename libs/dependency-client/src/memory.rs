use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};

use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use stream_api::{DependencyClient, DependencyKind, FormatId, StreamError};

/// In-process dependency store. Ids are the SHA-256 of the document's JSON bytes.
///
/// Counts `get`/`put` calls so callers can assert on network traffic.
#[derive(Debug, Default)]
pub struct MemoryDependencyClient {
    documents: RwLock<HashMap<(DependencyKind, FormatId), serde_json::Value>>,
    gets: AtomicUsize,
    puts: AtomicUsize,
}

impl MemoryDependencyClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Content hash used as the document id.
    pub fn content_id(document: &serde_json::Value) -> FormatId {
        // serde_json objects are key-sorted, so equal documents hash equally.
        let bytes = serde_json::to_vec(document).unwrap_or_default();
        FormatId::new(hex::encode(Sha256::digest(&bytes)))
    }

    /// Seed a document under an explicit id.
    pub async fn insert(&self, kind: DependencyKind, id: FormatId, document: serde_json::Value) {
        self.documents.write().await.insert((kind, id), document);
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::Relaxed)
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::Relaxed)
    }
}

impl DependencyClient for MemoryDependencyClient {
    fn get(
        &self,
        kind: DependencyKind,
        id: &FormatId,
    ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, StreamError>> + Send + '_>> {
        let id = id.clone();
        Box::pin(async move {
            self.gets.fetch_add(1, Ordering::Relaxed);
            self.documents
                .read()
                .await
                .get(&(kind, id.clone()))
                .cloned()
                .ok_or_else(|| StreamError::unresolved(&id, format!("unknown {kind}")))
        })
    }

    fn put(
        &self,
        kind: DependencyKind,
        document: &serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<FormatId, StreamError>> + Send + '_>> {
        let document = document.clone();
        Box::pin(async move {
            self.puts.fetch_add(1, Ordering::Relaxed);
            let id = Self::content_id(&document);
            self.documents.write().await.insert((kind, id.clone()), document);
            Ok(id)
        })
    }
}
