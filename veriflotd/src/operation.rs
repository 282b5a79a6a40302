/**
 * DISPATCHER D'OPÉRATIONS - Exécution locale ou fan-out vers les pairs
 *
 * RÔLE : Un batch tourne soit localement (checkers via le pool), soit en
 * asynchrone vers chaque hôte vivant (RPC via le pool, un seul saut).
 * L'échec d'un pair reste confiné à son entrée de résultat : l'échec
 * partiel est un chemin de succès de premier ordre, pas une erreur.
 */

use crate::checkers;
use crate::host::Host;
use crate::pool::Pool;
use crate::server::Server;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;
use veriflot_rpc::{
    Operation, OperationInput, OperationOutput, OperationResult, RpcError, ServerIdentifier,
};

impl Server {
    /// Sync when `forward` is false, async handle otherwise.
    pub(crate) async fn run_operation(
        self: &Arc<Self>,
        input: OperationInput,
    ) -> Result<OperationOutput, RpcError> {
        if input.forward {
            let handle = self.generate_handle();
            info!(handle = %handle, ops = input.ops.len(), "forwarding operation batch");

            let server = self.clone();
            let mut forwarded = input;
            // peers run locally: exactly one hop of forwarding
            forwarded.forward = false;
            let task_handle = handle.clone();
            tokio::spawn(async move {
                server.run_forwarded_operation(task_handle, forwarded).await;
            });

            return Ok(OperationOutput {
                handle: Some(handle),
                ..Default::default()
            });
        }

        let started_at = OffsetDateTime::now_utc();
        let accumulator: Arc<Mutex<HashMap<String, OperationResult>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let (tx, rx) = mpsc::channel(input.ops.len().max(1));
        let acc = accumulator.clone();
        let pool = Pool::start(
            self.shutdown.clone(),
            self.config.num_workers,
            rx,
            move |(name, op): (String, Operation)| {
                let acc = acc.clone();
                async move {
                    let result = checkers::run_check(&op);
                    acc.lock().insert(name, result);
                }
            },
        );

        for entry in input.ops {
            if tx.send(entry).await.is_err() {
                break;
            }
        }
        drop(tx);
        pool.wait().await;

        let mut results = HashMap::new();
        results.insert(
            self.self_identifier(),
            std::mem::take(&mut *accumulator.lock()),
        );

        Ok(OperationOutput {
            handle: None,
            results,
            started_at: Some(started_at),
            ended_at: Some(OffsetDateTime::now_utc()),
        })
    }

    /// Fans the batch out to every alive peer. Every per-host completion
    /// persists the partial buffer; only the post-`ended_at` state is
    /// guaranteed stable.
    async fn run_forwarded_operation(self: Arc<Self>, handle: String, input: OperationInput) {
        let output = Arc::new(Mutex::new(OperationOutput {
            handle: None,
            results: HashMap::new(),
            started_at: Some(OffsetDateTime::now_utc()),
            ended_at: None,
        }));
        self.set_op_buffer(&handle, output.lock().clone());

        let hosts = self.snapshot_hosts().await;
        let input = Arc::new(input);

        let (tx, rx) = mpsc::channel(hosts.len().max(1));
        let server = self.clone();
        let cb_output = output.clone();
        let cb_handle = handle.clone();
        let cb_input = input.clone();
        let pool = Pool::start(
            self.shutdown.clone(),
            self.config.num_workers,
            rx,
            move |host: Arc<Host>| {
                let server = server.clone();
                let output = cb_output.clone();
                let handle = cb_handle.clone();
                let input = cb_input.clone();
                async move {
                    if !host.is_alive() {
                        return;
                    }
                    match host.call_operation(&input, &server.config).await {
                        Ok(peer_output) => {
                            // a peer may report sub-results under its own
                            // identifier; provenance is preserved as-is
                            let mut out = output.lock();
                            for (identifier, results) in peer_output.results {
                                out.results.insert(identifier, results);
                            }
                            server.set_op_buffer(&handle, out.clone());
                        }
                        Err(e) => {
                            debug!(endpoint = %host.endpoint, error = %e, "operation forward failed");
                            // one transport failure fails every requested
                            // operation for this peer; the identifier falls
                            // back to the endpoint since the real one could
                            // not be confirmed
                            let failed: HashMap<String, OperationResult> = input
                                .ops
                                .keys()
                                .map(|name| {
                                    (
                                        name.clone(),
                                        OperationResult {
                                            success: false,
                                            err: Some(e.to_string()),
                                        },
                                    )
                                })
                                .collect();
                            let mut out = output.lock();
                            out.results
                                .insert(ServerIdentifier::from(&host.endpoint), failed);
                            server.set_op_buffer(&handle, out.clone());
                        }
                    }
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

        let mut out = output.lock();
        out.ended_at = Some(OffsetDateTime::now_utc());
        self.set_op_buffer(&handle, out.clone());
        info!(handle = %handle, servers = out.results.len(), "operation batch ended");
    }

    /// Short, human-typable, unique within one process run thanks to the
    /// counter; the random prefix keeps handles from colliding across
    /// restarts.
    pub(crate) fn generate_handle(&self) -> String {
        let serial = self.next_op_handle.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}{}", random_letters(3), serial)
    }
}

fn random_letters(count: usize) -> String {
    Uuid::new_v4()
        .as_bytes()
        .iter()
        .take(count)
        .map(|b| char::from(b'a' + b % 26))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::testutil::spawn_test_server;
    use std::io::Write;
    use std::time::Duration;
    use veriflot_rpc::{AddHostInput, AddHostOutput, Endpoint, OperationStatusCheckInput};

    fn ops_for(path: &str) -> HashMap<String, Operation> {
        let mut ops = HashMap::new();
        ops.insert(
            "check1".to_string(),
            Operation {
                op_type: "file_exists".into(),
                path_arg: path.into(),
                check_arg: String::new(),
            },
        );
        ops.insert(
            "check2".to_string(),
            Operation {
                op_type: "no_such_kind".into(),
                path_arg: String::new(),
                check_arg: String::new(),
            },
        );
        ops
    }

    async fn poll_until_ended(
        client: &mut veriflot_rpc::RpcClient,
        env: &str,
        handle: &str,
    ) -> OperationOutput {
        for _ in 0..100 {
            let input = OperationStatusCheckInput {
                common: veriflot_rpc::CommonInput { env: env.into() },
                handle: handle.to_string(),
            };
            let out: OperationOutput = client.call("OperationStatusCheck", &input).await.unwrap();
            if out.ended_at.is_some() {
                return out;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("operation {handle} never ended");
    }

    #[tokio::test]
    async fn test_local_run_is_synchronous() {
        let ts = spawn_test_server("prod").await;
        let mut client = ts.client().await;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "x").unwrap();

        let input = OperationInput {
            common: ts.common("prod"),
            forward: false,
            ops: ops_for(&file.path().to_string_lossy()),
        };
        let out: OperationOutput = client.call("RunOperation", &input).await.unwrap();

        assert!(out.handle.is_none());
        let started = out.started_at.unwrap();
        let ended = out.ended_at.unwrap();
        assert!(ended >= started);

        // never handshaked: results sit under the empty identifier
        let local = &out.results[&ServerIdentifier::default()];
        assert!(local["check1"].success);
        assert!(!local["check2"].success);
        assert!(local["check2"].err.as_ref().unwrap().contains("unhandled operation type"));
    }

    #[tokio::test]
    async fn test_forwarded_run_reaches_live_peers() {
        let coordinator = spawn_test_server("prod").await;
        let peer = spawn_test_server("prod").await;
        let mut client = coordinator.client().await;

        let add = AddHostInput {
            common: coordinator.common("prod"),
            endpoint: Endpoint::new(&peer.addr),
        };
        let _: AddHostOutput = client.call("AddHost", &add).await.unwrap();

        let file = tempfile::NamedTempFile::new().unwrap();
        let input = OperationInput {
            common: coordinator.common("prod"),
            forward: true,
            ops: ops_for(&file.path().to_string_lossy()),
        };
        let out: OperationOutput = client.call("RunOperation", &input).await.unwrap();
        let handle = out.handle.expect("async run returns a handle");
        assert!(out.ended_at.is_none());

        let done = poll_until_ended(&mut client, "prod", &handle).await;

        // the peer labels its results with the identifier we proposed at
        // add time: its endpoint
        let peer_results = &done.results[&ServerIdentifier(peer.addr.clone())];
        assert!(peer_results["check1"].success);
        assert!(!peer_results["check2"].success);

        // completed entries are immutable: a repeated poll is identical
        let again = poll_until_ended(&mut client, "prod", &handle).await;
        assert_eq!(again.ended_at, done.ended_at);
        assert_eq!(again.results.len(), done.results.len());
    }

    #[tokio::test]
    async fn test_forwarded_run_synthesizes_results_for_dead_peer() {
        let coordinator = spawn_test_server("prod").await;
        let peer = spawn_test_server("prod").await;
        let mut client = coordinator.client().await;

        let add = AddHostInput {
            common: coordinator.common("prod"),
            endpoint: Endpoint::new(&peer.addr),
        };
        let _: AddHostOutput = client.call("AddHost", &add).await.unwrap();

        // peer dies after the add: still marked alive, still fanned out to
        peer.stop();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let input = OperationInput {
            common: coordinator.common("prod"),
            forward: true,
            ops: ops_for("/etc/hosts"),
        };
        let out: OperationOutput = client.call("RunOperation", &input).await.unwrap();
        let handle = out.handle.unwrap();

        let done = poll_until_ended(&mut client, "prod", &handle).await;

        // every requested name must appear under the endpoint-derived
        // fallback identifier, each carrying the transport error
        let fallback = &done.results[&ServerIdentifier(peer.addr.clone())];
        assert_eq!(fallback.len(), 2);
        for name in ["check1", "check2"] {
            let res = &fallback[name];
            assert!(!res.success);
            assert!(res.err.is_some());
        }
    }

    #[tokio::test]
    async fn test_status_check_unknown_handle() {
        let ts = spawn_test_server("prod").await;
        let mut client = ts.client().await;

        let input = OperationStatusCheckInput {
            common: ts.common("prod"),
            handle: "zzz999".into(),
        };
        let err = client
            .call::<_, OperationOutput>("OperationStatusCheck", &input)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid handle"));
    }

    #[tokio::test]
    async fn test_handles_are_unique_and_shaped() {
        let ts = spawn_test_server("prod").await;
        let a = ts.server.generate_handle();
        let b = ts.server.generate_handle();
        assert_ne!(a, b);
        assert!(a.ends_with('1'));
        assert!(b.ends_with('2'));
        assert!(a.chars().take(3).all(|c| c.is_ascii_lowercase()));
    }
}
