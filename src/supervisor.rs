//! Supervisor (spec §4.7): starts pollers and the sync manager as
//! concurrent tasks, installs signal handlers, and drains outstanding
//! work within a grace period on shutdown.
//!
//! The original process uses a broadcast channel for shutdown fan-out;
//! this rearchitects that as a [`CancellationToken`], the lighter
//! primitive for "one cancellation, many observers" once no payload
//! needs to ride along with the signal.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::clock::RealClock;
use crate::config::Settings;
use crate::poller::docker::ContainerPoller;
use crate::poller::traefik::ProxyRouterPoller;
use crate::poller::Poller;
use crate::provider::CloudflareProvider;
use crate::sync::{forward_snapshots, job_queue, SyncManager};

const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(10);

pub struct Supervisor {
    settings: Settings,
}

impl Supervisor {
    pub fn new(settings: Settings) -> Self {
        Supervisor { settings }
    }

    /// Runs until cancelled by a signal, returning the process exit code
    /// (spec §6 "CLI"): `0` on clean shutdown.
    pub async fn run(self) -> i32 {
        let cancel = CancellationToken::new();
        install_signal_handlers(cancel.clone());

        let mut sources = 0usize;
        let mut tasks = JoinSet::new();
        let (job_tx, job_rx) = job_queue(2);

        if self.settings.enable_docker_poll {
            sources += 1;
            let poller = ContainerPoller::connect(
                Duration::from_secs(self.settings.docker_poll_seconds),
                self.settings.traefik_filter_label.clone(),
                self.settings.traefik_filter_value.clone(),
            );
            match poller {
                Ok(poller) => {
                    let poller = Arc::new(poller);
                    spawn_poller(&mut tasks, poller, job_tx.clone(), cancel.clone());
                }
                Err(err) => {
                    tracing::error!(error = %err, docker_host = %std::env::var("DOCKER_HOST").unwrap_or_default(), "could not connect to docker");
                    return 1;
                }
            }
        }

        if self.settings.enable_traefik_poll {
            sources += 1;
            let base_url = self
                .settings
                .traefik_poll_url
                .clone()
                .expect("validated at config load: traefik poll requires a URL");
            let poller = ProxyRouterPoller::new(
                &base_url,
                Duration::from_secs(self.settings.traefik_timeout_seconds),
                Duration::from_secs(self.settings.traefik_poll_seconds),
                self.settings.traefik_included_hosts.clone(),
                self.settings.traefik_excluded_hosts.clone(),
            );
            match poller {
                Ok(poller) => {
                    let poller = Arc::new(poller);
                    spawn_poller(&mut tasks, poller, job_tx.clone(), cancel.clone());
                }
                Err(err) => {
                    tracing::error!(error = %err, url = %base_url, "could not build traefik router client");
                    return 1;
                }
            }
        }
        drop(job_tx);

        let provider = match CloudflareProvider::new(self.settings.cf_token.clone(), self.settings.cf_email.clone()) {
            Ok(provider) => provider,
            Err(err) => {
                tracing::error!(error = %err, "could not build cloudflare client");
                return 1;
            }
        };

        let sync_manager = SyncManager::new(self.settings.zones.clone());
        let clock = RealClock;
        let settings = self.settings.clone();
        let sync_cancel = cancel.clone();
        tasks.spawn(async move {
            sync_manager.run(job_rx, &provider, &clock, &settings, sync_cancel).await;
        });

        tracing::info!(sources, "supervisor started");

        cancel.cancelled().await;
        tracing::info!("shutdown signal received, draining outstanding work");

        let drained = tokio::time::timeout(SHUTDOWN_GRACE_PERIOD, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        match drained {
            Ok(()) => {
                tracing::info!("clean shutdown");
                0
            }
            Err(_) => {
                tracing::warn!("grace period elapsed with tasks still running, forcing exit");
                tasks.abort_all();
                0
            }
        }
    }
}

fn spawn_poller<P>(tasks: &mut JoinSet<()>, poller: Arc<P>, job_tx: tokio::sync::mpsc::Sender<crate::sync::SyncJob>, cancel: CancellationToken)
where
    P: Poller + 'static,
{
    let forward_receiver = poller.subscribe();
    let run_poller = poller.clone();
    let run_cancel = cancel.clone();
    tasks.spawn(async move {
        run_poller.run(run_cancel, None).await;
    });
    let forward_cancel = cancel;
    tasks.spawn(async move {
        forward_snapshots(forward_receiver, job_tx, forward_cancel).await;
    });
}

fn install_signal_handlers(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
            let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("received SIGTERM"),
                _ = sigint.recv() => tracing::info!("received SIGINT"),
            }
            cancel.cancel();
        });
    }

    #[cfg(windows)]
    {
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("received Ctrl+C");
            cancel.cancel();
        });
    }
}
