use std::time::Duration;
use tracing::warn;
use veriflot_rpc::{DEFAULT_ENV, DEFAULT_PORT};

/// Runtime configuration of the daemon. Env tag and listen port are the
/// only required surface; everything else has defaults. No file-based
/// state, on purpose.
#[derive(Debug, Clone)]
pub struct Config {
    /// Environment tag; every inbound call must carry the same one.
    pub env: String,
    /// Listen port.
    pub port: u16,
    /// Worker count per operation (health sweeps, local checks, fan-out).
    pub num_workers: usize,
    /// Interval between periodic health-check sweeps.
    pub health_interval: Duration,
    /// Per-host health-check RPC timeout, independent of the transport.
    pub health_timeout: Duration,
    /// Per-host RunOperation forwarding timeout.
    pub op_forward_timeout: Duration,
    /// Server-to-server dial timeout.
    pub dial_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            env: DEFAULT_ENV.to_string(),
            port: DEFAULT_PORT,
            num_workers: default_workers(),
            health_interval: Duration::from_secs(60),
            health_timeout: Duration::from_secs(5),
            op_forward_timeout: Duration::from_secs(30),
            dial_timeout: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Builds a config from `VERIFLOT_*` env variables, falling back to
    /// defaults on missing or invalid values.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(env) = std::env::var("VERIFLOT_ENV") {
            if !env.is_empty() {
                cfg.env = env;
            }
        }
        if let Some(port) = parse_var("VERIFLOT_PORT") {
            cfg.port = port;
        }
        if let Some(workers) = parse_var("VERIFLOT_WORKERS") {
            cfg.num_workers = workers;
        }
        if let Some(secs) = parse_var("VERIFLOT_HEALTH_INTERVAL_SECS") {
            cfg.health_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var("VERIFLOT_HEALTH_TIMEOUT_SECS") {
            cfg.health_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var("VERIFLOT_OP_TIMEOUT_SECS") {
            cfg.op_forward_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var("VERIFLOT_DIAL_TIMEOUT_SECS") {
            cfg.dial_timeout = Duration::from_secs(secs);
        }
        cfg
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(var = name, value = raw, "ignoring invalid value");
            None
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
