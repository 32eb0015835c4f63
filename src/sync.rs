//! Sync manager (spec §4.5): the single consumer of hostname snapshots
//! that deduplicates against a "synced map" and dispatches reconciliation.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::config::{Settings, ZoneSpec};
use crate::poller::{HostnameSnapshot, HostnameSource};
use crate::provider::DnsProvider;
use crate::reconciler::Reconciler;

/// Process-wide mapping from hostname to the source-rank that last
/// successfully synced it (spec §3 "Synced map"). Grows monotonically:
/// a rank is only ever replaced by a strictly lower one.
#[derive(Default)]
pub struct SyncedMap {
    ranks: Mutex<HashMap<String, u8>>,
}

impl SyncedMap {
    pub fn new() -> Self {
        SyncedMap { ranks: Mutex::new(HashMap::new()) }
    }

    /// Returns `true` if `hostname` should be (re)synced at `rank`: no
    /// prior record, or the incoming rank is strictly lower (spec §3).
    pub fn should_sync(&self, hostname: &str, rank: u8) -> bool {
        match self.ranks.lock().get(hostname) {
            None => true,
            Some(recorded) => rank < *recorded,
        }
    }

    pub fn record(&self, hostname: &str, rank: u8) {
        self.ranks.lock().insert(hostname.to_string(), rank);
    }

    #[cfg(test)]
    fn rank_of(&self, hostname: &str) -> Option<u8> {
        self.ranks.lock().get(hostname).copied()
    }
}

/// Internal queue element (spec §3 "Sync job").
pub struct SyncJob {
    pub source: HostnameSource,
    pub hostnames: Vec<String>,
}

impl From<HostnameSnapshot> for SyncJob {
    fn from(snapshot: HostnameSnapshot) -> Self {
        SyncJob {
            source: snapshot.source,
            hostnames: snapshot.hostnames,
        }
    }
}

pub struct SyncManager {
    synced: SyncedMap,
    zones: Vec<ZoneSpec>,
}

impl SyncManager {
    pub fn new(zones: Vec<ZoneSpec>) -> Self {
        SyncManager { synced: SyncedMap::new(), zones }
    }

    /// Runs until `jobs` is closed or `cancel` fires. One job at a time;
    /// the synced map is only ever touched from this loop (spec §4.5
    /// "Concurrency").
    pub async fn run(
        &self,
        mut jobs: mpsc::Receiver<SyncJob>,
        provider: &dyn DnsProvider,
        clock: &dyn Clock,
        settings: &Settings,
        cancel: CancellationToken,
    ) {
        let reconciler = Reconciler::new(
            provider,
            clock,
            settings.dry_run,
            settings.refresh_entries,
            settings.rc_type.clone(),
            settings.max_retries,
            &settings.traefik_included_hosts,
            &settings.traefik_excluded_hosts,
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("sync manager cancelled");
                    return;
                }
                job = jobs.recv() => {
                    let Some(job) = job else {
                        tracing::info!("sync manager input queue closed");
                        return;
                    };
                    self.handle_job(job, &reconciler).await;
                }
            }
        }
    }

    async fn handle_job(&self, job: SyncJob, reconciler: &Reconciler<'_>) {
        let rank = job.source.rank();
        for hostname in job.hostnames {
            if !self.synced.should_sync(&hostname, rank) {
                continue;
            }
            if reconciler.reconcile(&hostname, &self.zones).await {
                self.synced.record(&hostname, rank);
            }
        }
    }
}

/// Builds the bounded work queue pollers feed into. Capacity equals the
/// number of distinct sources so a slow consumer only ever backpressures
/// as many in-flight snapshots as there are producers (spec §3).
pub fn job_queue(source_count: usize) -> (mpsc::Sender<SyncJob>, mpsc::Receiver<SyncJob>) {
    mpsc::channel(source_count.max(1))
}

/// Forwards every value observed on a poller's watch channel into the
/// shared job queue. The drop-oldest-on-overflow policy (spec §5) is
/// already provided by the watch channel itself: if this loop falls
/// behind while the queue send blocks, `receiver.changed()` coalesces
/// every intermediate publish and hands back only the latest snapshot
/// once it resumes, so a backed-up consumer never sees stale ones.
/// Runs until the poller's sender is dropped or `cancel` fires.
pub async fn forward_snapshots(
    mut receiver: tokio::sync::watch::Receiver<HostnameSnapshot>,
    sender: mpsc::Sender<SyncJob>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            changed = receiver.changed() => {
                if changed.is_err() {
                    return;
                }
                let snapshot = receiver.borrow_and_update().clone();
                let job: SyncJob = snapshot.into();
                if sender.send(job).await.is_err() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synced_map_syncs_when_absent() {
        let map = SyncedMap::new();
        assert!(map.should_sync("a.example.com", HostnameSource::Container.rank()));
    }

    #[test]
    fn synced_map_rejects_equal_or_higher_rank() {
        let map = SyncedMap::new();
        map.record("a.example.com", HostnameSource::Container.rank());
        assert!(!map.should_sync("a.example.com", HostnameSource::Container.rank()));
        assert!(!map.should_sync("a.example.com", HostnameSource::ProxyRouter.rank()));
    }

    #[test]
    fn synced_map_accepts_strictly_lower_rank() {
        let map = SyncedMap::new();
        map.record("a.example.com", HostnameSource::Manual.rank());
        assert!(map.should_sync("a.example.com", HostnameSource::Container.rank()));
        map.record("a.example.com", HostnameSource::Container.rank());
        assert_eq!(map.rank_of("a.example.com"), Some(HostnameSource::Container.rank()));
    }
}
