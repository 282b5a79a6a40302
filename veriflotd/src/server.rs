/**
 * SERVEUR VERIFLOTD - Contexte coordinateur + boucle d'acceptation TCP
 *
 * RÔLE : État partagé unique du démon (registre des hôtes, buffer de
 * résultats, identifiant, canal de refresh) construit une fois au
 * démarrage, passé explicitement partout. Aucun singleton caché.
 *
 * FONCTIONNEMENT : chaque connexion entrante tourne dans sa propre tâche,
 * lit des trames Request, passe par le middleware (version + env tag) puis
 * dispatch vers le handler. Les erreurs d'un handler repartent en string
 * vers l'appelant, jamais en panique.
 */

use crate::config::Config;
use crate::host::Host;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use veriflot_rpc::wire::{self, Request, Response};
use veriflot_rpc::{
    parse_method, AddHostInput, AddHostOutput, CommonInput, Endpoint, HealthCheckInput,
    HealthCheckOutput, ListHostsInput, ListHostsOutput, OperationOutput, RefreshInput,
    RefreshOutput, RemoveHostInput, RemoveHostOutput, RpcError, ServerIdentifier,
    SetIdentifierInput, SetIdentifierOutput, DEFAULT_PORT,
};

pub struct Server {
    pub config: Config,

    /// Identity proposed by whichever coordinator registered us; labels
    /// our contributions in aggregated results.
    identifier: RwLock<Option<ServerIdentifier>>,

    /// Registered peers, append-only order. The registry lock is never
    /// held across a network call; each Host carries its own lock.
    hosts: tokio::sync::RwLock<Vec<Arc<Host>>>,

    /// Async operation results by handle. Grows unbounded: completed
    /// entries are never evicted (known gap, same as the original design).
    op_buffer: RwLock<HashMap<String, OperationOutput>>,
    pub(crate) next_op_handle: AtomicU64,

    /// Capacity-1 signal: a pending forced refresh coalesces with new ones.
    force_refresh: mpsc::Sender<()>,

    pub(crate) shutdown: watch::Receiver<bool>,
}

impl Server {
    pub fn new(config: Config, shutdown: watch::Receiver<bool>) -> (Arc<Self>, mpsc::Receiver<()>) {
        let (force_refresh, force_rx) = mpsc::channel(1);
        let server = Arc::new(Self {
            config,
            identifier: RwLock::new(None),
            hosts: tokio::sync::RwLock::new(Vec::new()),
            op_buffer: RwLock::new(HashMap::new()),
            next_op_handle: AtomicU64::new(0),
            force_refresh,
            shutdown,
        });
        (server, force_rx)
    }

    /// Accept loop; one task per connection, stops on shutdown.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        let mut shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("shutting down listener");
                    return;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "accepted connection");
                        let server = self.clone();
                        tokio::spawn(async move { server.handle_connection(stream).await });
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                }
            }
        }
    }

    async fn handle_connection(self: Arc<Self>, mut stream: TcpStream) {
        let mut shutdown = self.shutdown.clone();
        loop {
            let frame = tokio::select! {
                _ = shutdown.changed() => return,
                frame = wire::read_frame::<_, Request>(&mut stream) => frame,
            };
            let request = match frame {
                Ok(Some(request)) => request,
                // peer closed between frames
                Ok(None) => return,
                Err(e) => {
                    debug!(error = %e, "dropping connection");
                    return;
                }
            };

            let response = match self.dispatch(&request.method, request.input).await {
                Ok(result) => Response {
                    result: Some(result),
                    error: None,
                },
                Err(e) => Response {
                    result: None,
                    error: Some(e.to_string()),
                },
            };
            if let Err(e) = wire::write_frame(&mut stream, &response).await {
                debug!(error = %e, "write failed, dropping connection");
                return;
            }
        }
    }

    /// Middleware + method dispatch: version gate first, then the env tag
    /// of the common input, then the handler.
    pub async fn dispatch(
        self: &Arc<Self>,
        method: &str,
        input: serde_json::Value,
    ) -> Result<serde_json::Value, RpcError> {
        let name = parse_method(method)?;

        let common: CommonInput = serde_json::from_value(input.clone())
            .map_err(|e| RpcError::BadInput(e.to_string()))?;
        if common.env != self.config.env {
            return Err(RpcError::EnvMismatch);
        }

        match name {
            "AddHost" => encode(self.add_host(decode(input)?).await?),
            "RemoveHost" => encode(self.remove_host(decode(input)?).await?),
            "ListHost" => encode(self.list_hosts(decode(input)?).await?),
            "HealthCheck" => encode(self.health_check(decode(input)?)?),
            "SetIdentifier" => encode(self.set_identifier(decode(input)?)?),
            "Refresh" => encode(self.refresh(decode(input)?)?),
            "RunOperation" => encode(self.run_operation(decode(input)?).await?),
            "OperationStatusCheck" => encode(self.operation_status_check(decode(input)?)?),
            other => Err(RpcError::UnknownMethod(other.to_string())),
        }
    }

    /// Registers a peer: dial + identifier handshake first (no registry
    /// lock held across the network), then append, then one best-effort
    /// health check.
    async fn add_host(self: &Arc<Self>, input: AddHostInput) -> Result<AddHostOutput, RpcError> {
        let endpoint = Endpoint::normalized(input.endpoint.as_str(), DEFAULT_PORT);

        if self.find_host(&endpoint).await.is_some() {
            return Err(RpcError::DuplicateHost);
        }

        let host = Arc::new(Host::new(endpoint.clone()));
        host.set_identifier(ServerIdentifier::from(&endpoint), &self.config)
            .await?;

        {
            let mut hosts = self.hosts.write().await;
            // a concurrent add may have won the race during the handshake
            if hosts.iter().any(|h| h.endpoint == endpoint) {
                return Err(RpcError::DuplicateHost);
            }
            hosts.push(host.clone());
        }
        info!(endpoint = %endpoint, "host added");

        // best-effort: an unreachable host stays registered, not alive
        match host.healthcheck(&self.config).await {
            Ok(true) => {}
            Ok(false) => warn!(endpoint = %endpoint, "initial healthcheck not ok"),
            Err(e) => warn!(endpoint = %endpoint, error = %e, "initial healthcheck failed"),
        }

        Ok(AddHostOutput { ok: true })
    }

    async fn remove_host(
        self: &Arc<Self>,
        input: RemoveHostInput,
    ) -> Result<RemoveHostOutput, RpcError> {
        let endpoint = Endpoint::normalized(input.endpoint.as_str(), DEFAULT_PORT);

        let host = {
            let mut hosts = self.hosts.write().await;
            let index = hosts
                .iter()
                .position(|h| h.endpoint == endpoint)
                .ok_or(RpcError::UnknownHost)?;
            hosts.remove(index)
        };
        host.close().await;
        info!(endpoint = %endpoint, "host removed");

        Ok(RemoveHostOutput { ok: true })
    }

    async fn list_hosts(
        self: &Arc<Self>,
        input: ListHostsInput,
    ) -> Result<ListHostsOutput, RpcError> {
        let hosts = self.hosts.read().await;
        let mut output = ListHostsOutput::default();
        for host in hosts.iter() {
            if input.list_active && host.is_alive() {
                output.active_hosts.push(host.endpoint.clone());
            }
            if input.list_inactive && !host.is_alive() {
                output.inactive_hosts.push(host.endpoint.clone());
            }
        }
        Ok(output)
    }

    /// No-op liveness probe.
    fn health_check(&self, _input: HealthCheckInput) -> Result<HealthCheckOutput, RpcError> {
        Ok(HealthCheckOutput { ok: true })
    }

    /// Idempotent-if-matching identifier assignment; two coordinators can
    /// never silently overwrite each other.
    fn set_identifier(
        &self,
        input: SetIdentifierInput,
    ) -> Result<SetIdentifierOutput, RpcError> {
        let mut identifier = self.identifier.write();
        match identifier.as_ref() {
            None => {
                info!(identifier = %input.identifier, "identifier set");
                *identifier = Some(input.identifier);
                Ok(SetIdentifierOutput { ok: true })
            }
            Some(current) if *current == input.identifier => Ok(SetIdentifierOutput { ok: true }),
            Some(_) => Err(RpcError::IdentifierMismatch),
        }
    }

    /// Never blocks the handler: try-send on the capacity-1 channel, a
    /// refresh already pending coalesces with this one.
    fn refresh(&self, _input: RefreshInput) -> Result<RefreshOutput, RpcError> {
        let _ = self.force_refresh.try_send(());
        Ok(RefreshOutput { ok: true })
    }

    async fn find_host(&self, endpoint: &Endpoint) -> Option<Arc<Host>> {
        self.hosts
            .read()
            .await
            .iter()
            .find(|h| h.endpoint == *endpoint)
            .cloned()
    }

    /// Read-lock snapshot so no pool ever blocks while the registry is
    /// locked.
    pub(crate) async fn snapshot_hosts(&self) -> Vec<Arc<Host>> {
        self.hosts.read().await.clone()
    }

    pub(crate) fn self_identifier(&self) -> ServerIdentifier {
        self.identifier.read().clone().unwrap_or_default()
    }

    pub(crate) fn set_op_buffer(&self, handle: &str, output: OperationOutput) {
        self.op_buffer.write().insert(handle.to_string(), output);
    }

    pub(crate) fn get_op_buffer(&self, handle: &str) -> Option<OperationOutput> {
        self.op_buffer.read().get(handle).cloned()
    }

    fn operation_status_check(
        &self,
        input: veriflot_rpc::OperationStatusCheckInput,
    ) -> Result<OperationOutput, RpcError> {
        self.get_op_buffer(&input.handle)
            .ok_or(RpcError::InvalidHandle)
    }
}

fn decode<T: serde::de::DeserializeOwned>(input: serde_json::Value) -> Result<T, RpcError> {
    serde_json::from_value(input).map_err(|e| RpcError::BadInput(e.to_string()))
}

fn encode<T: serde::Serialize>(output: T) -> Result<serde_json::Value, RpcError> {
    Ok(serde_json::to_value(output)?)
}


#[cfg(test)]
mod tests {
    use super::testutil::spawn_test_server;
    use super::*;

    #[tokio::test]
    async fn test_env_mismatch_is_rejected() {
        let ts = spawn_test_server("prod").await;
        let mut client = ts.client().await;

        let input = HealthCheckInput {
            common: CommonInput { env: "staging".into() },
        };
        let err = client
            .call::<_, HealthCheckOutput>("HealthCheck", &input)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("env mismatch"));
    }

    #[tokio::test]
    async fn test_health_check_is_ok() {
        let ts = spawn_test_server("prod").await;
        let mut client = ts.client().await;

        let input = HealthCheckInput { common: ts.common("prod") };
        let out: HealthCheckOutput = client.call("HealthCheck", &input).await.unwrap();
        assert!(out.ok);
    }

    #[tokio::test]
    async fn test_version_mismatch_fails_resolution() {
        let ts = spawn_test_server("prod").await;
        let server = ts.server.clone();

        let err = server
            .dispatch("veriflot.v2.HealthCheck", serde_json::json!({"env": "prod"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("protocol version mismatch"));
    }

    #[tokio::test]
    async fn test_add_list_remove_host() {
        let coordinator = spawn_test_server("prod").await;
        let peer = spawn_test_server("prod").await;
        let mut client = coordinator.client().await;

        let add = AddHostInput {
            common: coordinator.common("prod"),
            endpoint: Endpoint::new(&peer.addr),
        };
        let out: AddHostOutput = client.call("AddHost", &add).await.unwrap();
        assert!(out.ok);

        // duplicate endpoint must not create a second entry
        let err = client.call::<_, AddHostOutput>("AddHost", &add).await.unwrap_err();
        assert!(err.to_string().contains("already exists"));

        // reachable peer: the immediate health check marks it active
        let list = ListHostsInput {
            common: coordinator.common("prod"),
            list_active: true,
            list_inactive: true,
        };
        let out: ListHostsOutput = client.call("ListHost", &list).await.unwrap();
        assert_eq!(out.active_hosts, vec![Endpoint::new(&peer.addr)]);
        assert!(out.inactive_hosts.is_empty());

        let del = RemoveHostInput {
            common: coordinator.common("prod"),
            endpoint: Endpoint::new(&peer.addr),
        };
        let out: RemoveHostOutput = client.call("RemoveHost", &del).await.unwrap();
        assert!(out.ok);

        let err = client
            .call::<_, RemoveHostOutput>("RemoveHost", &del)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn test_add_host_unreachable_endpoint_fails() {
        let coordinator = spawn_test_server("prod").await;
        let mut client = coordinator.client().await;

        // grab a port that nothing listens on
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_addr = probe.local_addr().unwrap().to_string();
        drop(probe);

        let add = AddHostInput {
            common: coordinator.common("prod"),
            endpoint: Endpoint::new(&dead_addr),
        };
        assert!(client.call::<_, AddHostOutput>("AddHost", &add).await.is_err());

        // the failed handshake must not leave a registry entry behind
        let list = ListHostsInput {
            common: coordinator.common("prod"),
            list_active: true,
            list_inactive: true,
        };
        let out: ListHostsOutput = client.call("ListHost", &list).await.unwrap();
        assert!(out.active_hosts.is_empty());
        assert!(out.inactive_hosts.is_empty());
    }

    #[tokio::test]
    async fn test_set_identifier_idempotent_if_matching() {
        let ts = spawn_test_server("prod").await;
        let mut client = ts.client().await;

        let first = SetIdentifierInput {
            common: ts.common("prod"),
            identifier: ServerIdentifier("10.1.1.1:7180".into()),
        };
        let out: SetIdentifierOutput = client.call("SetIdentifier", &first).await.unwrap();
        assert!(out.ok);

        // same value again: fine
        let out: SetIdentifierOutput = client.call("SetIdentifier", &first).await.unwrap();
        assert!(out.ok);

        // different value: rejected, stored identifier untouched
        let other = SetIdentifierInput {
            common: ts.common("prod"),
            identifier: ServerIdentifier("10.2.2.2:7180".into()),
        };
        let err = client
            .call::<_, SetIdentifierOutput>("SetIdentifier", &other)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("identifier already set"));
        assert_eq!(ts.server.self_identifier().0, "10.1.1.1:7180");
    }

    #[tokio::test]
    async fn test_refresh_coalesces_pending_signals() {
        let mut ts = spawn_test_server("prod").await;
        let mut client = ts.client().await;

        let input = RefreshInput { common: ts.common("prod") };
        let out: RefreshOutput = client.call("Refresh", &input).await.unwrap();
        assert!(out.ok);
        let out: RefreshOutput = client.call("Refresh", &input).await.unwrap();
        assert!(out.ok);

        // two requests, one queued signal
        assert!(ts.force_rx.try_recv().is_ok());
        assert!(ts.force_rx.try_recv().is_err());
    }
}
