use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-album exclusion for attach and detach within this process.
///
/// Operations on the same album run one at a time; different albums never
/// wait on each other.
#[derive(Default)]
pub struct AlbumLeases {
    leases: Mutex<HashMap<u64, Arc<AsyncMutex<()>>>>,
}

impl AlbumLeases {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, album_id: u64) -> OwnedMutexGuard<()> {
        let lease = {
            let mut leases = self.leases.lock().unwrap_or_else(|p| p.into_inner());
            // Entries only the map still holds are idle.
            leases.retain(|_, lease| Arc::strong_count(lease) > 1);
            Arc::clone(leases.entry(album_id).or_default())
        };
        lease.lock_owned().await
    }

    /// Albums with a lease currently held or awaited.
    pub fn active(&self) -> usize {
        let leases = self.leases.lock().unwrap_or_else(|p| p.into_inner());
        leases
            .values()
            .filter(|lease| Arc::strong_count(lease) > 1)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_album_is_exclusive() {
        let leases = AlbumLeases::new();
        let _held = leases.acquire(7).await;

        let second = tokio::time::timeout(Duration::from_millis(50), leases.acquire(7)).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn different_albums_do_not_wait() {
        let leases = AlbumLeases::new();
        let _first = leases.acquire(7).await;

        let second = tokio::time::timeout(Duration::from_millis(50), leases.acquire(8)).await;
        assert!(second.is_ok());
        assert_eq!(leases.active(), 2);
    }

    #[tokio::test]
    async fn released_leases_are_pruned() {
        let leases = AlbumLeases::new();
        drop(leases.acquire(7).await);
        let _other = leases.acquire(8).await;
        assert_eq!(leases.active(), 1);
    }
}
