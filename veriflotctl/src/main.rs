/**
 * VERIFLOTCTL - Client de contrôle du démon veriflot
 *
 * RÔLE : Traduit une commande texte (table partagée dans veriflot-rpc) en
 * appel RPC et rend la réponse lisible. Une connexion TCP persistante par
 * invocation, réutilisée en mode batch.
 *
 * FONCTIONNEMENT : `veriflotctl <commande> [arg]` pour un tir unique,
 * `veriflotctl -` pour lire des commandes ligne par ligne sur stdin
 * (découpage shell, `#` commente, une erreur n'arrête pas le batch).
 */

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, FromArgMatches, Parser};
use std::collections::HashMap;
use std::io::BufRead;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use veriflot_rpc::{
    commands, AddHostInput, AddHostOutput, CommonInput, Endpoint, ListHostsInput, ListHostsOutput,
    Operation, OperationInput, OperationOutput, OperationStatusCheckInput, RefreshInput,
    RefreshOutput, RemoveHostInput, RemoveHostOutput, RpcClient, DEFAULT_ENV, DEFAULT_PORT,
};

#[derive(Parser, Debug)]
#[command(name = "veriflotctl", about = "Control client for veriflotd", version)]
struct Cli {
    /// Environment tag, must match the daemon's.
    #[arg(long, default_value = DEFAULT_ENV)]
    env: String,

    /// Daemon address to connect to.
    #[arg(long, default_value_t = format!("localhost:{DEFAULT_PORT}"))]
    connect: String,

    /// Dial and per-call timeout.
    #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
    timeout: Duration,

    /// Command and its argument, or `-` to read commands from stdin.
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,
}

fn command_help() -> String {
    let mut entries: Vec<_> = commands::COMMANDS.iter().collect();
    entries.sort_by_key(|(_, cfg)| cfg.order);
    let mut help = String::from("Commands:\n");
    for (name, cfg) in entries {
        let args = if cfg.num_args > 0 { " <arg>" } else { "" };
        help.push_str(&format!("  {name}{args}\n      {}\n", cfg.description));
    }
    help.push_str("  -\n      Reads commands from stdin, one per line\n");
    help
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut command = Cli::command().after_help(command_help());
    let cli = Cli::from_arg_matches(&command.clone().get_matches())?;

    if cli.command.is_empty() {
        command.print_help()?;
        return Ok(());
    }

    let mut client = RpcClient::dial(&cli.connect, cli.timeout)
        .await
        .with_context(|| format!("connecting to {}", cli.connect))?;

    if cli.command[0] == "-" {
        return run_batch(&mut client, &cli).await;
    }
    run_command(&mut client, &cli, &cli.command).await
}

/// Stdin mode: one command per line, shell-style splitting. A failing
/// line is reported and skipped; the batch keeps going.
async fn run_batch(client: &mut RpcClient, cli: &Cli) -> Result<()> {
    let stdin = std::io::stdin();
    let mut processed = 0usize;
    for line in stdin.lock().lines() {
        let line = line.context("reading stdin")?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let args = match shell_words::split(line) {
            Ok(args) => args,
            Err(e) => {
                eprintln!("skipping line {line:?}: {e}");
                continue;
            }
        };
        if args.is_empty() {
            continue;
        }
        if let Err(e) = run_command(client, cli, &args).await {
            eprintln!("command {line:?} failed: {e}");
        }
        processed += 1;
    }
    println!("commands processed: {processed}");
    Ok(())
}

async fn run_command(client: &mut RpcClient, cli: &Cli, args: &[String]) -> Result<()> {
    let name = args[0].as_str();
    let cfg = match commands::lookup(name) {
        Some(cfg) => cfg,
        None => bail!("unknown command: {name}"),
    };
    if args.len() - 1 != cfg.num_args {
        bail!("{name} takes {} argument(s), got {}", cfg.num_args, args.len() - 1);
    }

    let common = CommonInput {
        env: cli.env.clone(),
    };
    let fut = async {
        match name {
            "add" => {
                let input = AddHostInput {
                    common,
                    endpoint: Endpoint::new(&args[1]),
                };
                let out: AddHostOutput = client.call(cfg.rpc_method, &input).await?;
                println!("ok: {}", out.ok);
            }
            "del" => {
                let input = RemoveHostInput {
                    common,
                    endpoint: Endpoint::new(&args[1]),
                };
                let out: RemoveHostOutput = client.call(cfg.rpc_method, &input).await?;
                println!("ok: {}", out.ok);
            }
            "list" | "listactive" | "listinactive" => {
                let input = ListHostsInput {
                    common,
                    list_active: name != "listinactive",
                    list_inactive: name != "listactive",
                };
                let out: ListHostsOutput = client.call(cfg.rpc_method, &input).await?;
                render_host_list(name, &out);
            }
            "refresh" => {
                let input = RefreshInput { common };
                let out: RefreshOutput = client.call(cfg.rpc_method, &input).await?;
                println!("ok: {}", out.ok);
            }
            "operation" => {
                let raw = std::fs::read_to_string(&args[1])
                    .with_context(|| format!("reading operations file {}", args[1]))?;
                let ops: HashMap<String, Operation> = serde_json::from_str(&raw)
                    .with_context(|| format!("parsing operations file {}", args[1]))?;
                let input = OperationInput {
                    common,
                    forward: true,
                    ops,
                };
                let out: OperationOutput = client.call(cfg.rpc_method, &input).await?;
                match out.handle {
                    Some(handle) => println!("handle: {handle}"),
                    None => println!("no handle returned"),
                }
            }
            "get" => {
                let input = OperationStatusCheckInput {
                    common,
                    handle: args[1].clone(),
                };
                let out: OperationOutput = client.call(cfg.rpc_method, &input).await?;
                render_operation(&args[1], &out);
            }
            _ => bail!("unknown command: {name}"),
        }
        Ok(())
    };
    match tokio::time::timeout(cli.timeout, fut).await {
        Ok(res) => res,
        Err(_) => bail!("{name} timed out after {:?}", cli.timeout),
    }
}

fn render_host_list(name: &str, out: &ListHostsOutput) {
    if name != "listinactive" {
        println!("Active hosts ({}):", out.active_hosts.len());
        for endpoint in &out.active_hosts {
            println!("  {endpoint}");
        }
    }
    if name != "listactive" {
        println!("Inactive hosts ({}):", out.inactive_hosts.len());
        for endpoint in &out.inactive_hosts {
            println!("  {endpoint}");
        }
    }
    println!("End of list.");
}

fn render_operation(handle: &str, out: &OperationOutput) {
    let status = if out.ended_at.is_some() { "done" } else { "running" };
    print!("Handle {handle}: {status}");
    if let Some(started) = fmt_time(out.started_at) {
        print!(" (started {started}");
        match fmt_time(out.ended_at) {
            Some(ended) => print!(", ended {ended})"),
            None => print!(")"),
        }
    }
    println!();

    let mut servers: Vec<_> = out.results.iter().collect();
    servers.sort_by(|a, b| a.0 .0.cmp(&b.0 .0));
    for (server, results) in servers {
        println!("  {server}:");
        let mut names: Vec<_> = results.keys().collect();
        names.sort();
        for name in names {
            let result = &results[name];
            if result.success {
                println!("    {name}: ok");
            } else {
                let err = result.err.as_deref().unwrap_or("unknown error");
                println!("    {name}: FAIL ({err})");
            }
        }
    }
}

fn fmt_time(at: Option<time::OffsetDateTime>) -> Option<String> {
    at.and_then(|at| at.format(&Rfc3339).ok())
}
