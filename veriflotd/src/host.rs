//! One registered peer: endpoint, liveness flag and the lazily-dialed
//! connection behind the host's own lock. Holding the lock across the
//! call serializes operations against one peer; different peers never
//! contend here.

use crate::config::Config;
use std::sync::atomic::{AtomicBool, Ordering};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{info, warn};
use veriflot_rpc::{
    CommonInput, Endpoint, HealthCheckInput, HealthCheckOutput, OperationInput, OperationOutput,
    RpcClient, RpcError, ServerIdentifier, SetIdentifierInput, SetIdentifierOutput,
};

pub struct Host {
    pub endpoint: Endpoint,
    pub added: OffsetDateTime,
    is_alive: AtomicBool,
    state: Mutex<ConnState>,
}

#[derive(Default)]
struct ConnState {
    /// None until the first successful dial; cleared on any failure so the
    /// next use redials.
    conn: Option<RpcClient>,
    /// Stamped on every attempt, not only on success.
    last_health_check_attempt: Option<OffsetDateTime>,
}

impl Host {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            added: OffsetDateTime::now_utc(),
            is_alive: AtomicBool::new(false),
            state: Mutex::new(ConnState::default()),
        }
    }

    /// Authoritative "should this host receive fan-out" flag. Only health
    /// checks ever write it.
    pub fn is_alive(&self) -> bool {
        self.is_alive.load(Ordering::Relaxed)
    }

    pub async fn last_health_check_attempt(&self) -> Option<OffsetDateTime> {
        self.state.lock().await.last_health_check_attempt
    }

    /// Idempotent connect: reuses the handle when present, dials otherwise.
    /// A failed dial clears the handle but leaves liveness untouched.
    async fn ensure_conn<'a>(
        &self,
        state: &'a mut ConnState,
        config: &Config,
    ) -> Result<&'a mut RpcClient, RpcError> {
        match state.conn {
            Some(ref mut conn) => Ok(conn),
            None => {
                let conn = RpcClient::dial(self.endpoint.as_str(), config.dial_timeout).await?;
                info!(endpoint = %self.endpoint, "connected to host");
                Ok(state.conn.insert(conn))
            }
        }
    }

    /// One health check: stamp the attempt, ensure a connection, issue the
    /// RPC under its own timeout. Failure flips the host down and discards
    /// the connection; transitions are logged, steady states are not.
    pub async fn healthcheck(&self, config: &Config) -> Result<bool, RpcError> {
        let was_alive = self.is_alive();
        let mut state = self.state.lock().await;
        state.last_health_check_attempt = Some(OffsetDateTime::now_utc());

        let result = async {
            let conn = self.ensure_conn(&mut state, config).await?;
            let input = HealthCheckInput {
                common: CommonInput {
                    env: config.env.clone(),
                },
            };
            match tokio::time::timeout(
                config.health_timeout,
                conn.call::<_, HealthCheckOutput>("HealthCheck", &input),
            )
            .await
            {
                Ok(res) => res,
                Err(_) => Err(RpcError::Timeout),
            }
        }
        .await;

        match result {
            Ok(output) => {
                self.is_alive.store(output.ok, Ordering::Relaxed);
                if was_alive != output.ok {
                    info!(endpoint = %self.endpoint, alive = output.ok, "host liveness changed");
                }
                Ok(output.ok)
            }
            Err(e) => {
                state.conn = None;
                self.is_alive.store(false, Ordering::Relaxed);
                if was_alive {
                    warn!(endpoint = %self.endpoint, error = %e, "healthcheck failed, marking host down");
                }
                Err(e)
            }
        }
    }

    /// Identifier handshake: proposes `identifier` (the endpoint as this
    /// coordinator knows it) so the peer can label its results.
    pub async fn set_identifier(
        &self,
        identifier: ServerIdentifier,
        config: &Config,
    ) -> Result<(), RpcError> {
        let mut state = self.state.lock().await;
        let result = async {
            let conn = self.ensure_conn(&mut state, config).await?;
            let input = SetIdentifierInput {
                common: CommonInput {
                    env: config.env.clone(),
                },
                identifier,
            };
            conn.call::<_, SetIdentifierOutput>("SetIdentifier", &input)
                .await
                .map(|_| ())
        }
        .await;

        if result.is_err() {
            state.conn = None;
        }
        result
    }

    /// Forwards one batch (already stripped of its forward flag) with a
    /// bounded timeout.
    pub async fn call_operation(
        &self,
        input: &OperationInput,
        config: &Config,
    ) -> Result<OperationOutput, RpcError> {
        let mut state = self.state.lock().await;
        let result = async {
            let conn = self.ensure_conn(&mut state, config).await?;
            match tokio::time::timeout(
                config.op_forward_timeout,
                conn.call::<_, OperationOutput>("RunOperation", input),
            )
            .await
            {
                Ok(res) => res,
                Err(_) => Err(RpcError::Timeout),
            }
        }
        .await;

        if result.is_err() {
            state.conn = None;
        }
        result
    }

    /// Drops the connection, closing the socket. Close errors are ignored.
    pub async fn close(&self) {
        self.state.lock().await.conn = None;
    }

    #[cfg(test)]
    pub(crate) async fn has_conn(&self) -> bool {
        self.state.lock().await.conn.is_some()
    }
}
