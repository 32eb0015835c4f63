//! DNS reconciler (spec §4.6): for each (hostname, zone) pair, decides
//! create-vs-update and issues the provider mutation, with rate-limit
//! backoff and dry-run support.

use std::time::Duration;

use regex::Regex;

use crate::clock::Clock;
use crate::config::ZoneSpec;
use crate::filter;
use crate::provider::{DnsProvider, ExistingRecord, ProviderError, RecordPayload};

pub struct Reconciler<'a> {
    provider: &'a dyn DnsProvider,
    clock: &'a dyn Clock,
    dry_run: bool,
    refresh_entries: bool,
    rc_type: String,
    max_retries: u32,
    include: &'a [Regex],
    exclude: &'a [Regex],
}

impl<'a> Reconciler<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: &'a dyn DnsProvider,
        clock: &'a dyn Clock,
        dry_run: bool,
        refresh_entries: bool,
        rc_type: String,
        max_retries: u32,
        include: &'a [Regex],
        exclude: &'a [Regex],
    ) -> Self {
        Reconciler {
            provider,
            clock,
            dry_run,
            refresh_entries,
            rc_type,
            max_retries,
            include,
            exclude,
        }
    }

    /// Reconciles `hostname` against every zone it is eligible for.
    /// Returns `true` iff every eligible pair succeeded (spec §4.6 step 6).
    pub async fn reconcile(&self, hostname: &str, zones: &[ZoneSpec]) -> bool {
        let mut ok = true;
        for zone in zones {
            if !filter::should_sync(hostname, self.include, self.exclude, zone) {
                continue;
            }
            if self.reconcile_pair(hostname, zone).await.is_err() {
                ok = false;
            }
        }
        ok
    }

    async fn reconcile_pair(&self, hostname: &str, zone: &ZoneSpec) -> Result<(), ()> {
        let records = self.get_records_with_backoff(&zone.zone_id, hostname).await?;

        let payload = RecordPayload {
            record_type: self.rc_type.clone(),
            name: hostname.to_string(),
            content: zone.target.clone(),
            ttl: zone.ttl,
            proxied: zone.proxied,
            comment: zone.comment.clone(),
        };

        if self.dry_run {
            if self.refresh_entries && !records.is_empty() {
                for record in &records {
                    tracing::info!(zone = %zone.zone_id, record_id = %record.id, ?payload, "dry-run: would PUT to cloudflare");
                }
            } else {
                tracing::info!(zone = %zone.zone_id, ?payload, "dry-run: would POST to cloudflare");
            }
            return Ok(());
        }

        if self.refresh_entries && !records.is_empty() {
            let mut all_ok = true;
            for record in &records {
                match self.provider.put_record(&zone.zone_id, &record.id, &payload).await {
                    Ok(()) => tracing::info!(zone = %zone.zone_id, record_id = %record.id, "updated record"),
                    Err(err) => {
                        tracing::error!(zone = %zone.zone_id, record_id = %record.id, error = %err, "failed to update record");
                        all_ok = false;
                    }
                }
            }
            if all_ok {
                Ok(())
            } else {
                Err(())
            }
        } else {
            match self.provider.post_record(&zone.zone_id, &payload).await {
                Ok(()) => {
                    tracing::info!(zone = %zone.zone_id, hostname = %hostname, "created record");
                    Ok(())
                }
                Err(err) => {
                    tracing::error!(zone = %zone.zone_id, hostname = %hostname, error = %err, "failed to create record");
                    Err(())
                }
            }
        }
    }

    /// Reads existing records, retrying on a rate-limit signal with
    /// exponential backoff (`2^(retry+1)` seconds) up to `max_retries`
    /// retries beyond the first attempt. Every sleep is awaited, spec §9
    /// flags that the original implementation forgets to in one path.
    async fn get_records_with_backoff(&self, zone_id: &str, name: &str) -> Result<Vec<ExistingRecord>, ()> {
        for retry in 0..=self.max_retries {
            match self.provider.get_records(zone_id, name).await {
                Ok(records) => return Ok(records),
                Err(ProviderError::RateLimited) => {
                    if retry == self.max_retries {
                        break;
                    }
                    let sleep_secs = 2u64.saturating_pow(retry + 1);
                    tracing::warn!(zone = %zone_id, name = %name, sleep_secs, "rate limited, backing off");
                    self.clock.sleep(Duration::from_secs(sleep_secs)).await;
                }
                Err(ProviderError::Other(msg)) => {
                    tracing::error!(zone = %zone_id, name = %name, error = %msg, "provider error reading records");
                    return Err(());
                }
            }
        }
        tracing::error!(zone = %zone_id, name = %name, "max retries exceeded reading records");
        Err(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeProvider {
        get_calls: AtomicU32,
        rate_limit_for: u32,
        records: Vec<ExistingRecord>,
        posts: Mutex<Vec<RecordPayload>>,
        puts: Mutex<Vec<(String, RecordPayload)>>,
    }

    impl FakeProvider {
        fn new(rate_limit_for: u32, records: Vec<ExistingRecord>) -> Self {
            FakeProvider {
                get_calls: AtomicU32::new(0),
                rate_limit_for,
                records,
                posts: Mutex::new(Vec::new()),
                puts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl DnsProvider for FakeProvider {
        async fn get_records(&self, _zone_id: &str, _name: &str) -> Result<Vec<ExistingRecord>, ProviderError> {
            let call = self.get_calls.fetch_add(1, Ordering::SeqCst);
            if call < self.rate_limit_for {
                Err(ProviderError::RateLimited)
            } else {
                Ok(self.records.clone())
            }
        }

        async fn post_record(&self, _zone_id: &str, payload: &RecordPayload) -> Result<(), ProviderError> {
            self.posts.lock().push(payload.clone());
            Ok(())
        }

        async fn put_record(&self, _zone_id: &str, record_id: &str, payload: &RecordPayload) -> Result<(), ProviderError> {
            self.puts.lock().push((record_id.to_string(), payload.clone()));
            Ok(())
        }
    }

    struct InstantClock;
    #[async_trait]
    impl Clock for InstantClock {
        async fn sleep(&self, _duration: Duration) {}
    }

    fn zone(name: &str, target: &str) -> ZoneSpec {
        ZoneSpec {
            name: name.to_string(),
            zone_id: "Z1".into(),
            proxied: true,
            ttl: 1,
            target: target.to_string(),
            comment: None,
            excluded_subdomains: vec![],
        }
    }

    #[tokio::test]
    async fn target_match_is_never_written() {
        let provider = FakeProvider::new(0, vec![]);
        let clock = InstantClock;
        let reconciler = Reconciler::new(&provider, &clock, false, false, "CNAME".into(), 5, &[], &[]);
        let z = zone("example.com", "target.example.com");
        let ok = reconciler.reconcile("target.example.com", &[z]).await;
        assert!(ok);
        assert!(provider.posts.lock().is_empty());
    }

    #[tokio::test]
    async fn excluded_subdomain_is_never_written() {
        let provider = FakeProvider::new(0, vec![]);
        let clock = InstantClock;
        let reconciler = Reconciler::new(&provider, &clock, false, false, "CNAME".into(), 5, &[], &[]);
        let mut z = zone("example.com", "target.example.com");
        z.excluded_subdomains = vec!["sub".into()];
        let ok = reconciler.reconcile("sub.example.com", &[z]).await;
        assert!(ok);
        assert!(provider.posts.lock().is_empty());
    }

    #[tokio::test]
    async fn creates_new_record_when_refresh_entries_disabled() {
        let provider = FakeProvider::new(0, vec![]);
        let clock = InstantClock;
        let reconciler = Reconciler::new(&provider, &clock, false, false, "CNAME".into(), 5, &[], &[]);
        let z = zone("example.com", "target.example.com");
        let ok = reconciler.reconcile("new.example.com", &[z]).await;
        assert!(ok);
        let posts = provider.posts.lock();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].name, "new.example.com");
        assert_eq!(posts[0].content, "target.example.com");
    }

    #[tokio::test]
    async fn updates_existing_record_when_refresh_entries_enabled() {
        let provider = FakeProvider::new(0, vec![ExistingRecord { id: "R1".into() }]);
        let clock = InstantClock;
        let reconciler = Reconciler::new(&provider, &clock, false, true, "CNAME".into(), 5, &[], &[]);
        let z = zone("example.com", "target.example.com");
        let ok = reconciler.reconcile("existing.example.com", &[z]).await;
        assert!(ok);
        assert!(provider.posts.lock().is_empty());
        let puts = provider.puts.lock();
        assert_eq!(puts.len(), 1);
        assert_eq!(puts[0].0, "R1");
    }

    #[tokio::test]
    async fn rate_limit_retries_then_succeeds() {
        let provider = FakeProvider::new(2, vec![]);
        let clock = InstantClock;
        let reconciler = Reconciler::new(&provider, &clock, false, false, "CNAME".into(), 5, &[], &[]);
        let z = zone("example.com", "target.example.com");
        let ok = reconciler.reconcile("rl.example.com", &[z]).await;
        assert!(ok);
        assert_eq!(provider.get_calls.load(Ordering::SeqCst), 3);
        assert_eq!(provider.posts.lock().len(), 1);
    }

    #[tokio::test]
    async fn exactly_max_retries_rate_limit_errors_then_success_still_succeeds() {
        let provider = FakeProvider::new(5, vec![]);
        let clock = InstantClock;
        let reconciler = Reconciler::new(&provider, &clock, false, false, "CNAME".into(), 5, &[], &[]);
        let z = zone("example.com", "target.example.com");
        let ok = reconciler.reconcile("rl.example.com", &[z]).await;
        assert!(ok);
    }

    #[tokio::test]
    async fn one_more_than_max_retries_rate_limit_errors_fails_the_pair() {
        let provider = FakeProvider::new(6, vec![]);
        let clock = InstantClock;
        let reconciler = Reconciler::new(&provider, &clock, false, false, "CNAME".into(), 5, &[], &[]);
        let z = zone("example.com", "target.example.com");
        let ok = reconciler.reconcile("rl.example.com", &[z]).await;
        assert!(!ok);
    }

    #[tokio::test]
    async fn dry_run_never_reaches_provider_writes() {
        let provider = FakeProvider::new(0, vec![]);
        let clock = InstantClock;
        let reconciler = Reconciler::new(&provider, &clock, true, false, "CNAME".into(), 5, &[], &[]);
        let z = zone("example.com", "target.example.com");
        let ok = reconciler.reconcile("new.example.com", &[z]).await;
        assert!(ok);
        assert!(provider.posts.lock().is_empty());
        assert!(provider.puts.lock().is_empty());
    }
}
