//! Container poller (spec §4.3): discovers hostnames from containers
//! whose labels match an operator-configured filter.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::ListContainersOptions;
use bollard::Docker;
use regex::Regex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::{async_backoff, BackoffError, Broadcaster, HostnameSnapshot, HostnameSource, Poller};

/// Matches router-rule-style label keys, e.g. `traefik.http.routers.foo.rule`.
/// Grounded on the rule-label scan in the original companion's container
/// poller, corrected per spec §4.3 to *locate* (not skip) matching labels.
fn rule_label_pattern() -> Regex {
    Regex::new(r"traefik.*\.rule").expect("static pattern is valid")
}

fn host_expr_pattern() -> Regex {
    Regex::new(r"Host\(`([^`]+)`\)").expect("static pattern is valid")
}

/// Extracts every `Host(\`...\`)` hostname from a container's labels, after
/// confirming the container carries a label matching `filter_label` whose
/// value matches `filter_value`.
fn hostnames_from_labels(
    labels: &HashMap<String, String>,
    filter_label: &Regex,
    filter_value: &Regex,
    rule_label: &Regex,
    host_expr: &Regex,
) -> Vec<String> {
    let enabled = labels
        .iter()
        .any(|(k, v)| filter_label.is_match(k) && filter_value.is_match(v));
    if !enabled {
        return Vec::new();
    }

    let mut hosts = Vec::new();
    for (key, value) in labels {
        if !rule_label.is_match(key) {
            continue;
        }
        if !value.contains("Host") {
            continue;
        }
        for cap in host_expr.captures_iter(value) {
            hosts.push(cap[1].to_string());
        }
    }
    hosts
}

pub struct ContainerPoller {
    docker: Docker,
    poll_interval: Duration,
    filter_label: Regex,
    filter_value: Regex,
    broadcaster: Broadcaster,
}

impl ContainerPoller {
    /// Connects to the Docker daemon using its default discovery rules
    /// (respecting `DOCKER_HOST` like the original). The connect timeout is
    /// left to bollard's own default rather than reused as the poll
    /// interval; conflating the two was flagged as a defect in the
    /// original implementation (spec §9).
    pub fn connect(
        poll_interval: Duration,
        filter_label: Regex,
        filter_value: Regex,
    ) -> Result<Self, bollard::errors::Error> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(ContainerPoller {
            docker,
            poll_interval,
            filter_label,
            filter_value,
            broadcaster: Broadcaster::new(HostnameSource::Container),
        })
    }

    async fn list_hostnames(&self) -> Result<Vec<String>, bollard::errors::Error> {
        let options = ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        };
        let containers = self.docker.list_containers(Some(options)).await?;

        let rule_label = rule_label_pattern();
        let host_expr = host_expr_pattern();

        let mut hosts = Vec::new();
        for container in containers {
            let labels = container.labels.unwrap_or_default();
            hosts.extend(hostnames_from_labels(
                &labels,
                &self.filter_label,
                &self.filter_value,
                &rule_label,
                &host_expr,
            ));
        }
        Ok(hosts)
    }
}

#[async_trait]
impl Poller for ContainerPoller {
    fn source(&self) -> HostnameSource {
        HostnameSource::Container
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn fetch(&self, cancel: &CancellationToken) -> HostnameSnapshot {
        let hosts = async_backoff(
            || async {
                self.list_hostnames().await.map_err(|err| {
                    tracing::warn!(error = %err, "docker list_containers failed");
                    BackoffError { fallback: Vec::new() }
                })
            },
            super::DEFAULT_BACKOFF_MAX_RETRIES,
            cancel,
        )
        .await;
        HostnameSnapshot::new(hosts, HostnameSource::Container)
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

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn skips_container_without_matching_filter() {
        let filter_label = Regex::new(r"traefik\.constraint").unwrap();
        let filter_value = Regex::new(r"public").unwrap();
        let rule_label = rule_label_pattern();
        let host_expr = host_expr_pattern();

        let labels = labels(&[(
            "traefik.http.routers.app.rule",
            "Host(`app.example.com`)",
        )]);
        let hosts = hostnames_from_labels(&labels, &filter_label, &filter_value, &rule_label, &host_expr);
        assert!(hosts.is_empty());
    }

    #[test]
    fn extracts_hostname_from_matching_container() {
        let filter_label = Regex::new(r"traefik\.constraint").unwrap();
        let filter_value = Regex::new(r"public").unwrap();
        let rule_label = rule_label_pattern();
        let host_expr = host_expr_pattern();

        let labels = labels(&[
            ("traefik.constraint", "public"),
            ("traefik.http.routers.app.rule", "Host(`app.example.com`)"),
        ]);
        let hosts = hostnames_from_labels(&labels, &filter_label, &filter_value, &rule_label, &host_expr);
        assert_eq!(hosts, vec!["app.example.com".to_string()]);
    }

    #[test]
    fn extracts_multiple_hosts_from_one_rule() {
        let filter_label = Regex::new(r"traefik\.constraint").unwrap();
        let filter_value = Regex::new(r"public").unwrap();
        let rule_label = rule_label_pattern();
        let host_expr = host_expr_pattern();

        let labels = labels(&[
            ("traefik.constraint", "public"),
            (
                "traefik.http.routers.app.rule",
                "Host(`a.example.com`) || Host(`b.example.com`)",
            ),
        ]);
        let hosts = hostnames_from_labels(&labels, &filter_label, &filter_value, &rule_label, &host_expr);
        assert_eq!(hosts, vec!["a.example.com".to_string(), "b.example.com".to_string()]);
    }

    #[test]
    fn ignores_non_rule_labels_even_when_filter_matches() {
        let filter_label = Regex::new(r"traefik\.constraint").unwrap();
        let filter_value = Regex::new(r"public").unwrap();
        let rule_label = rule_label_pattern();
        let host_expr = host_expr_pattern();

        let labels = labels(&[("traefik.constraint", "public"), ("com.example.owner", "team-a")]);
        let hosts = hostnames_from_labels(&labels, &filter_label, &filter_value, &rule_label, &host_expr);
        assert!(hosts.is_empty());
    }
}
