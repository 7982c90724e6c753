use std::sync::Arc;
use std::time::Duration;

use crate::engine::{InMemoryStore, StoreError};
use crate::observability::WAL_COMPACTIONS_TOTAL;

/// Background task that rewrites the WAL as a snapshot once enough events
/// have been appended since the last rewrite.
pub async fn run_compactor(store: Arc<InMemoryStore>, threshold: u64, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_due(&store, threshold).await {
            tracing::error!("compaction failed: {e}");
        }
    }
}

/// Compacts when at least `threshold` appends are pending. Returns the
/// snapshot size in events, or `None` if nothing was done.
pub async fn compact_if_due(store: &InMemoryStore, threshold: u64) -> Result<Option<usize>, StoreError> {
    let pending = store.appends_since_compact().await;
    if pending < threshold.max(1) {
        return Ok(None);
    }
    let events = store.compact().await?;
    metrics::counter!(WAL_COMPACTIONS_TOTAL).increment(1);
    tracing::info!("compacted WAL: {pending} appends folded into {events} events");
    Ok(Some(events))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use ulid::Ulid;

    use super::*;
    use crate::engine::Store;
    use crate::model::*;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("reservd_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let store = InMemoryStore::open(&path).unwrap();
        let room = Ulid::new();
        store.register_resource(Resource::facility(room, "F101")).await.unwrap();
        store
            .set_resource_active(ResourceRef::facility(room), false)
            .await
            .unwrap();
        store
            .set_resource_active(ResourceRef::facility(room), true)
            .await
            .unwrap();

        assert_eq!(compact_if_due(&store, 10).await.unwrap(), None);
        assert_eq!(compact_if_due(&store, 3).await.unwrap(), Some(1));
        assert_eq!(store.appends_since_compact().await, 0);
        assert_eq!(compact_if_due(&store, 3).await.unwrap(), None);

        let reopened = InMemoryStore::open(&path).unwrap();
        let resource = reopened.load_resource(ResourceRef::facility(room)).await.unwrap();
        assert!(resource.active);
    }
}
