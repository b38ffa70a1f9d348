//! Reconciliation sweep.
//!
//! Objects in the media bucket with no media row are left behind by failed
//! commits, failed compensations and failed detach removals. The sweep deletes
//! them once their write intent (if any) is older than the grace window, so
//! uploads still in flight are never touched. Each removal first claims the key
//! in the record store, which fails if the key was reserved or committed after
//! the snapshot and blocks new reservations until the object is gone. Rows
//! whose object is missing are reported but kept.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::object_store::{ObjectStore, ObjectStoreError};
use crate::storage::models::PendingObject;
use crate::storage::{Database, DatabaseError};

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("Listing the media bucket failed: {0}")]
    Store(#[from] ObjectStoreError),
    #[error(transparent)]
    Record(#[from] DatabaseError),
}

/// A media row whose object is missing from the bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DanglingReference {
    pub album_id: u64,
    pub media_id: u64,
    pub key: String,
}

#[derive(Debug, Default, Serialize)]
pub struct SweepReport {
    pub objects_scanned: usize,
    pub orphans_removed: Vec<String>,
    /// Unreferenced objects whose upload may still be in flight
    pub orphans_deferred: Vec<String>,
    pub removal_failures: Vec<String>,
    pub dangling: Vec<DanglingReference>,
    pub intents_cleared: usize,
}

impl SweepReport {
    pub fn is_quiet(&self) -> bool {
        self.orphans_removed.is_empty()
            && self.removal_failures.is_empty()
            && self.dangling.is_empty()
            && self.intents_cleared == 0
    }
}

pub struct ReconciliationSweep {
    db: Database,
    store: Arc<dyn ObjectStore>,
    bucket: String,
    grace: Duration,
}

impl ReconciliationSweep {
    pub fn new(db: Database, store: Arc<dyn ObjectStore>, bucket: &str, grace: Duration) -> Self {
        Self {
            db,
            store,
            bucket: bucket.to_string(),
            grace,
        }
    }

    pub async fn run_once(&self) -> Result<SweepReport, SweepError> {
        let mut report = SweepReport::default();

        let names = self.store.list_bucket_names().await?;
        if !names.contains(&self.bucket) {
            debug!(bucket = %self.bucket, "Media bucket does not exist yet, nothing to sweep");
            return Ok(report);
        }

        // List objects before reading records, so every listed object has
        // either its row or its intent in the snapshot.
        let objects: HashSet<String> = self
            .store
            .list_keys(&self.bucket)
            .await?
            .into_iter()
            .collect();
        let (media, pending) = self.db.reconciliation_snapshot()?;
        report.objects_scanned = objects.len();

        let referenced: HashSet<&str> = media.iter().map(|m| m.name.as_str()).collect();
        let intents: HashMap<&str, &PendingObject> =
            pending.iter().map(|intent| (intent.key.as_str(), intent)).collect();
        let now = Utc::now();
        let grace = chrono::Duration::from_std(self.grace)
            .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));
        let is_fresh = |intent: &PendingObject| now - intent.created_at < grace;

        let mut orphans: Vec<&String> = objects
            .iter()
            .filter(|key| !referenced.contains(key.as_str()))
            .collect();
        orphans.sort();

        for key in &orphans {
            let seen = intents.get(key.as_str()).copied();
            if seen.is_some_and(is_fresh) {
                report.orphans_deferred.push(key.to_string());
                continue;
            }
            // The snapshot may be out of date by now: an upload can have
            // reserved the key again, or committed a row for it.
            let Some(claim) = self.db.claim_orphan(key, seen)? else {
                debug!(key = %key, "Orphan changed since the snapshot, leaving it");
                report.orphans_deferred.push(key.to_string());
                continue;
            };
            if seen.is_some() {
                report.intents_cleared += 1;
            }

            let removed = self.store.remove(&self.bucket, key).await;
            self.db.release_claim(&claim)?;
            match removed {
                Ok(()) => report.orphans_removed.push(key.to_string()),
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to remove orphaned object");
                    report.removal_failures.push(key.to_string());
                }
            }
        }

        for row in &media {
            if !objects.contains(&row.name) {
                warn!(
                    album_id = row.album_id,
                    media_id = row.id,
                    key = %row.name,
                    "Media row references a missing object"
                );
                report.dangling.push(DanglingReference {
                    album_id: row.album_id,
                    media_id: row.id,
                    key: row.name.clone(),
                });
            }
        }

        let orphan_keys: HashSet<&str> = orphans.iter().map(|key| key.as_str()).collect();
        let stale: Vec<PendingObject> = pending
            .iter()
            .filter(|intent| !orphan_keys.contains(intent.key.as_str()) && !is_fresh(intent))
            .cloned()
            .collect();
        report.intents_cleared += self.db.clear_stale_intents(&stale)?;

        Ok(report)
    }

    /// Run the sweep every `interval` until the handle is aborted.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match self.run_once().await {
                    Ok(report) if report.is_quiet() => {
                        debug!(scanned = report.objects_scanned, "Reconciliation sweep found nothing");
                    }
                    Ok(report) => info!(
                        scanned = report.objects_scanned,
                        removed = report.orphans_removed.len(),
                        deferred = report.orphans_deferred.len(),
                        failures = report.removal_failures.len(),
                        dangling = report.dangling.len(),
                        intents_cleared = report.intents_cleared,
                        "Reconciliation sweep finished"
                    ),
                    Err(e) => warn!(error = %e, "Reconciliation sweep failed"),
                }
            }
        })
    }
}
