//! Proxy-router poller (spec §4.4): polls a Traefik-style router API over
//! HTTP and extracts hostnames from router rules.

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::{async_backoff, BackoffError, Broadcaster, HostnameSnapshot, HostnameSource, Poller};

#[derive(Debug, Deserialize)]
struct Router {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    rule: Option<String>,
}

impl Router {
    fn is_valid(&self) -> bool {
        self.name.is_some()
            && self.status.as_deref() == Some("enabled")
            && self.rule.as_deref().is_some_and(|r| r.contains("Host"))
    }
}

fn host_expr_pattern() -> Regex {
    Regex::new(r"Host\(`([^`]+)`\)").expect("static pattern is valid")
}

/// Mirrors the original `TraefikPoller._is_valid_host`: a host must match
/// at least one include pattern and no exclude pattern. `included_hosts`
/// is never empty by the time it reaches here; config loading defaults
/// it to `[".*"]`.
fn is_valid_host(host: &str, included_hosts: &[Regex], excluded_hosts: &[Regex]) -> bool {
    included_hosts.iter().any(|p| p.is_match(host)) && !excluded_hosts.iter().any(|p| p.is_match(host))
}

pub struct ProxyRouterPoller {
    client: reqwest::Client,
    routers_url: String,
    poll_interval: Duration,
    included_hosts: Vec<Regex>,
    excluded_hosts: Vec<Regex>,
    broadcaster: Broadcaster,
}

impl ProxyRouterPoller {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        poll_interval: Duration,
        included_hosts: Vec<Regex>,
        excluded_hosts: Vec<Regex>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(ProxyRouterPoller {
            client,
            routers_url: format!("{}/api/http/routers", base_url.trim_end_matches('/')),
            poll_interval,
            included_hosts,
            excluded_hosts,
            broadcaster: Broadcaster::new(HostnameSource::ProxyRouter),
        })
    }

    async fn fetch_routers(&self) -> Result<Vec<Router>, reqwest::Error> {
        self.client
            .get(&self.routers_url)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<Router>>()
            .await
    }

    fn extract_hostnames(&self, routers: Vec<Router>) -> Vec<String> {
        let host_expr = host_expr_pattern();
        let mut hosts = Vec::new();
        for router in routers.iter().filter(|r| r.is_valid()) {
            let rule = router.rule.as_deref().unwrap_or_default();
            for cap in host_expr.captures_iter(rule) {
                let host = cap[1].to_string();
                if is_valid_host(&host, &self.included_hosts, &self.excluded_hosts) {
                    tracing::debug!(router = ?router.name, host = %host, "found traefik router hostname");
                    hosts.push(host);
                }
            }
        }
        hosts
    }
}

#[async_trait]
impl Poller for ProxyRouterPoller {
    fn source(&self) -> HostnameSource {
        HostnameSource::ProxyRouter
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn fetch(&self, cancel: &CancellationToken) -> HostnameSnapshot {
        let hosts = async_backoff(
            || async {
                match self.fetch_routers().await {
                    Ok(routers) => Ok(self.extract_hostnames(routers)),
                    Err(err) => {
                        tracing::warn!(error = %err, url = %self.routers_url, "failed to fetch routers from traefik api");
                        Err(BackoffError { fallback: Vec::new() })
                    }
                }
            },
            super::DEFAULT_BACKOFF_MAX_RETRIES,
            cancel,
        )
        .await;
        HostnameSnapshot::new(hosts, HostnameSource::ProxyRouter)
    }

    fn subscribe(&self) -> watch::Receiver<HostnameSnapshot> {
        self.broadcaster.subscribe()
    }

    fn publish(&self, snapshot: HostnameSnapshot) {
        self.broadcaster.publish(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn match_all() -> Vec<Regex> {
        vec![Regex::new(".*").unwrap()]
    }

    #[test]
    fn router_valid_requires_enabled_status_and_host_in_rule() {
        let valid = Router {
            status: Some("enabled".into()),
            name: Some("app".into()),
            rule: Some("Host(`app.example.com`)".into()),
        };
        assert!(valid.is_valid());

        let disabled = Router {
            status: Some("disabled".into()),
            name: Some("app".into()),
            rule: Some("Host(`app.example.com`)".into()),
        };
        assert!(!disabled.is_valid());

        let no_host = Router {
            status: Some("enabled".into()),
            name: Some("app".into()),
            rule: Some("PathPrefix(`/api`)".into()),
        };
        assert!(!no_host.is_valid());

        let no_name = Router {
            status: Some("enabled".into()),
            name: None,
            rule: Some("Host(`app.example.com`)".into()),
        };
        assert!(!no_name.is_valid());
    }

    #[test]
    fn is_valid_host_requires_include_match_and_rejects_exclude_match() {
        let include = vec![Regex::new(r"^a\.").unwrap()];
        let exclude = vec![Regex::new(r"internal").unwrap()];
        assert!(is_valid_host("a.example.com", &include, &exclude));
        assert!(!is_valid_host("b.example.com", &include, &exclude));
        assert!(!is_valid_host("a.internal.example.com", &include, &exclude));
    }

    #[tokio::test]
    async fn extract_hostnames_pulls_every_host_expr_from_valid_routers() {
        let poller = ProxyRouterPoller::new(
            "http://127.0.0.1:8080",
            Duration::from_secs(1),
            Duration::from_secs(5),
            match_all(),
            vec![],
        )
        .unwrap();

        let routers = vec![
            Router {
                status: Some("enabled".into()),
                name: Some("app".into()),
                rule: Some("Host(`a.example.com`) || Host(`b.example.com`)".into()),
            },
            Router {
                status: Some("disabled".into()),
                name: Some("other".into()),
                rule: Some("Host(`skipped.example.com`)".into()),
            },
        ];
        let hosts = poller.extract_hostnames(routers);
        assert_eq!(hosts, vec!["a.example.com".to_string(), "b.example.com".to_string()]);
    }

    #[test]
    fn router_with_no_host_expr_extracts_zero_hostnames() {
        let poller = ProxyRouterPoller::new(
            "http://127.0.0.1:8080",
            Duration::from_secs(1),
            Duration::from_secs(5),
            match_all(),
            vec![],
        )
        .unwrap();
        let routers = vec![Router {
            status: Some("enabled".into()),
            name: Some("app".into()),
            rule: Some("PathPrefix(`/no-host-here`)".into()),
        }];
        assert!(poller.extract_hostnames(routers).is_empty());
    }
}
