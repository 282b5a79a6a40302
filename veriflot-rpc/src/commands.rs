//! Map of all cli commands, shared so daemon and cli agree on the surface.

/// Configuration of one cli command.
pub struct CommandConfig {
    /// Listing order in cli help.
    pub order: usize,
    /// Number of arguments the command expects.
    pub num_args: usize,
    /// Help string.
    pub description: &'static str,
    /// RPC method to call (bare name, versioned at the client).
    pub rpc_method: &'static str,
}

pub const COMMANDS: &[(&str, CommandConfig)] = &[
    ("add", CommandConfig { order: 1, num_args: 1, description: "Adds a host to veriflotd", rpc_method: "AddHost" }),
    ("del", CommandConfig { order: 2, num_args: 1, description: "Removes a host from veriflotd", rpc_method: "RemoveHost" }),
    ("list", CommandConfig { order: 3, num_args: 0, description: "Lists hosts in veriflotd", rpc_method: "ListHost" }),
    ("listactive", CommandConfig { order: 4, num_args: 0, description: "Lists active hosts in veriflotd", rpc_method: "ListHost" }),
    ("listinactive", CommandConfig { order: 5, num_args: 0, description: "Lists inactive hosts in veriflotd", rpc_method: "ListHost" }),
    ("refresh", CommandConfig { order: 6, num_args: 0, description: "Forces a health-check sweep", rpc_method: "Refresh" }),
    ("operation", CommandConfig { order: 7, num_args: 1, description: "Runs operations from a JSON file on all hosts", rpc_method: "RunOperation" }),
    ("get", CommandConfig { order: 8, num_args: 1, description: "Fetches operation results by handle", rpc_method: "OperationStatusCheck" }),
];

pub fn lookup(command: &str) -> Option<&'static CommandConfig> {
    COMMANDS
        .iter()
        .find(|(name, _)| *name == command)
        .map(|(_, cfg)| cfg)
}
