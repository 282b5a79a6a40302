//! Async RPC client over a persistent TCP connection.

use crate::error::RpcError;
use crate::proto::build_method;
use crate::wire::{self, Request, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

pub struct RpcClient {
    stream: TcpStream,
    peer: String,
}

impl RpcClient {
    /// Dials `addr` with a bounded timeout.
    pub async fn dial(addr: &str, timeout: Duration) -> Result<Self, RpcError> {
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(res) => res?,
            Err(_) => return Err(RpcError::Timeout),
        };
        debug!(peer = addr, "dialed");
        Ok(Self {
            stream,
            peer: addr.to_string(),
        })
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// One request/response round trip. The method name is versioned here;
    /// callers pass the bare name ("HealthCheck", "RunOperation", ...).
    pub async fn call<I, O>(&mut self, rpc_method: &str, input: &I) -> Result<O, RpcError>
    where
        I: Serialize,
        O: DeserializeOwned,
    {
        let request = Request {
            method: build_method(rpc_method),
            input: serde_json::to_value(input)?,
        };
        wire::write_frame(&mut self.stream, &request).await?;

        let response: Response = wire::read_frame(&mut self.stream)
            .await?
            .ok_or_else(|| RpcError::Transport("connection closed mid-call".into()))?;

        if let Some(error) = response.error {
            return Err(RpcError::Remote(error));
        }
        let result = response.result.unwrap_or(serde_json::Value::Null);
        Ok(serde_json::from_value(result)?)
    }
}
