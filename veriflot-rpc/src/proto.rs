//! I/O signatures of every RPC call, plus the versioned method envelope.

use crate::endpoint::Endpoint;
use crate::error::RpcError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use time::OffsetDateTime;

/// Poor man's protocol versioning: the method prefix is the whole
/// compatibility gate.
pub const PROTO_VERSION: &str = "veriflot.v1";

/// Prepends the protocol version to an rpc method name.
pub fn build_method(rpc_method: &str) -> String {
    format!("{PROTO_VERSION}.{rpc_method}")
}

/// Strips and checks the protocol version, returning the bare method name.
pub fn parse_method(method: &str) -> Result<&str, RpcError> {
    match method
        .strip_prefix(PROTO_VERSION)
        .and_then(|rest| rest.strip_prefix('.'))
    {
        Some(name) if !name.is_empty() => Ok(name),
        _ => Err(RpcError::VersionMismatch(method.to_string())),
    }
}

/// Included (flattened) in all RPC inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommonInput {
    pub env: String,
}

/// Self-asserted identity a peer uses to label its own contributions in
/// aggregated results. Normally its own endpoint; empty until the first
/// `SetIdentifier` handshake lands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerIdentifier(pub String);

impl fmt::Display for ServerIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&Endpoint> for ServerIdentifier {
    fn from(endpoint: &Endpoint) -> Self {
        Self(endpoint.as_str().to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddHostInput {
    #[serde(flatten)]
    pub common: CommonInput,
    pub endpoint: Endpoint,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddHostOutput {
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveHostInput {
    #[serde(flatten)]
    pub common: CommonInput,
    pub endpoint: Endpoint,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveHostOutput {
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListHostsInput {
    #[serde(flatten)]
    pub common: CommonInput,
    pub list_active: bool,
    pub list_inactive: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListHostsOutput {
    #[serde(default)]
    pub active_hosts: Vec<Endpoint>,
    #[serde(default)]
    pub inactive_hosts: Vec<Endpoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckInput {
    #[serde(flatten)]
    pub common: CommonInput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckOutput {
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetIdentifierInput {
    #[serde(flatten)]
    pub common: CommonInput,
    pub identifier: ServerIdentifier,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetIdentifierOutput {
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshInput {
    #[serde(flatten)]
    pub common: CommonInput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshOutput {
    pub ok: bool,
}

/// A single declarative check. The meaning of `path`/`check` depends on the
/// type tag; unknown tags are reported per-operation, never as a batch
/// failure, so the tag stays a plain string on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    #[serde(rename = "type")]
    pub op_type: String,
    #[serde(default, rename = "path")]
    pub path_arg: String,
    #[serde(default, rename = "check")]
    pub check_arg: String,
}

/// Result of a single operation. `err` is the error rendered as text: it
/// has to cross the wire as data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

/// results[server identifier][operation name] -> result
pub type ResultsMap = HashMap<ServerIdentifier, HashMap<String, OperationResult>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationInput {
    #[serde(flatten)]
    pub common: CommonInput,

    /// When true, fan the batch out to every alive peer (async, only a
    /// handle is returned). Peers always receive `forward=false`: exactly
    /// one hop, no propagation loops.
    pub forward: bool,

    /// Map of operations, keyed by a caller-chosen unique name.
    pub ops: HashMap<String, Operation>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationOutput {
    /// Set only for async submissions; poll it with OperationStatusCheck.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,

    #[serde(default)]
    pub results: ResultsMap,

    #[serde(default, with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,

    /// None means "still running"; once set, the results are final.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub ended_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationStatusCheckInput {
    #[serde(flatten)]
    pub common: CommonInput,
    pub handle: String,
}

pub type OperationStatusCheckOutput = OperationOutput;
