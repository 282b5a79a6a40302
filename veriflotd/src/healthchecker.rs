//! Periodic + forced health-check loop. One loop per daemon; sweeps never
//! overlap because the next wake only happens after the pool drains.

use crate::pool::Pool;
use crate::server::Server;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

impl Server {
    /// Wakes on shutdown (terminal), forced refresh, or the interval
    /// timer, in that order of priority.
    pub fn spawn_healthchecker(
        self: &Arc<Self>,
        mut force: mpsc::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        let server = self.clone();
        tokio::spawn(async move {
            let mut shutdown = server.shutdown.clone();
            loop {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    _ = force.recv() => {
                        info!("starting forced health checks");
                        server.run_healthcheck().await;
                    }
                    _ = tokio::time::sleep(server.config.health_interval) => {
                        server.run_healthcheck().await;
                    }
                }
            }
        })
    }

    /// One sweep: snapshot the registry, release the lock, drive the host
    /// pool over every entry.
    pub(crate) async fn run_healthcheck(self: &Arc<Self>) {
        let hosts = self.snapshot_hosts().await;
        if hosts.is_empty() {
            return;
        }

        let (tx, rx) = mpsc::channel(hosts.len());
        let server = self.clone();
        let pool = Pool::start(
            self.shutdown.clone(),
            self.config.num_workers,
            rx,
            move |host: Arc<crate::host::Host>| {
                let server = server.clone();
                async move {
                    // failures already flip liveness and log transitions
                    let _ = host.healthcheck(&server.config).await;
                }
            },
        );

        for host in hosts {
            if tx.send(host).await.is_err() {
                break;
            }
        }
        drop(tx);
        pool.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use crate::server::testutil::spawn_test_server;
    use veriflot_rpc::{AddHostInput, AddHostOutput, Endpoint};

    #[tokio::test]
    async fn test_sweep_flips_liveness_and_drops_connection() {
        let coordinator = spawn_test_server("prod").await;
        let peer = spawn_test_server("prod").await;
        let mut client = coordinator.client().await;

        let add = AddHostInput {
            common: coordinator.common("prod"),
            endpoint: Endpoint::new(&peer.addr),
        };
        let out: AddHostOutput = client.call("AddHost", &add).await.unwrap();
        assert!(out.ok);

        let host = coordinator.server.snapshot_hosts().await.remove(0);
        assert!(host.is_alive());
        assert!(host.has_conn().await);
        let first_attempt = host.last_health_check_attempt().await.unwrap();

        // peer goes away; the next sweep must mark the host down and
        // discard the connection so a later attempt redials
        peer.stop();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        coordinator.server.run_healthcheck().await;
        assert!(!host.is_alive());
        assert!(!host.has_conn().await);
        assert!(host.last_health_check_attempt().await.unwrap() >= first_attempt);
    }
}
