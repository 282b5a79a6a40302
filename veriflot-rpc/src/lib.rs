/**
 * VERIFLOT RPC - Surface RPC partagée entre veriflotd et veriflotctl
 *
 * RÔLE : Types d'entrée/sortie de chaque appel RPC, enveloppe versionnée,
 * codec filaire (trames JSON préfixées par la longueur) et client async.
 *
 * ARCHITECTURE : Chaque méthode voyage en `veriflot.v1.<Nom>` sur une
 * connexion TCP persistante. Un préfixe de version différent ne résout
 * simplement pas la méthode : c'est tout le garde-fou de compatibilité.
 */

pub mod client;
pub mod commands;
pub mod endpoint;
pub mod error;
pub mod proto;
pub mod wire;

pub use client::RpcClient;
pub use endpoint::Endpoint;
pub use error::RpcError;
pub use proto::*;

/// Default env tag, shared by daemon and cli when nothing is configured.
pub const DEFAULT_ENV: &str = "default";

/// Default listen port of veriflotd.
pub const DEFAULT_PORT: u16 = 7180;
