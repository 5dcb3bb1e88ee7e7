use clap::Parser;
use log::{info, warn};
use server::config::SyncConfig;
use server::groups::{FileGroupRegistry, GroupRegistry, MemoryGroupRegistry};
use server::network::{NodeOptions, NodeResult, NodeServer, ServerMessage};
use server::progression::{FilePersistence, MemoryPersistence, PersistenceAdapter};
use shared::{PlayerId, ProcessId};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "7000")]
    port: u16,

    /// Identity of this process within the cluster
    #[arg(short = 'i', long, default_value = "1")]
    process_id: u32,

    /// Peer process as ID=ADDR, e.g. 2=127.0.0.1:7001 (repeatable)
    #[arg(long = "peer", value_parser = parse_peer)]
    peers: Vec<(ProcessId, SocketAddr)>,

    /// Coop group as comma separated player ids (repeatable).
    ///
    /// Every node keeps its own copy of the groups, so pass the same lists to
    /// each node. With a data directory they are applied only while its group
    /// file is still empty; prunes recorded there survive restarts.
    #[arg(long = "coop")]
    coops: Vec<String>,

    /// Directory for progression and group files; keeps everything in memory if omitted
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Maximum sessions hosted by this node
    #[arg(short, long, default_value = "256")]
    max_sessions: usize,

    /// Cross-process lookup timeout in milliseconds
    #[arg(long, default_value = "500")]
    lookup_timeout_ms: u64,

    /// Remote delivery timeout in milliseconds
    #[arg(long, default_value = "500")]
    delivery_timeout_ms: u64,

    /// Idle session timeout in seconds
    #[arg(long, default_value = "30")]
    session_timeout_secs: u64,
}

fn parse_peer(value: &str) -> Result<(ProcessId, SocketAddr), String> {
    let (id, addr) = value
        .split_once('=')
        .ok_or_else(|| format!("expected ID=ADDR, got '{}'", value))?;
    let id = id.parse::<u32>().map_err(|e| e.to_string())?;
    let addr = addr.parse::<SocketAddr>().map_err(|e| e.to_string())?;
    Ok((ProcessId(id), addr))
}

fn parse_coop(value: &str) -> Result<Vec<PlayerId>, uuid::Error> {
    value
        .split(',')
        .map(str::trim)
        .filter(|member| !member.is_empty())
        .map(str::parse::<PlayerId>)
        .collect()
}

#[tokio::main]
async fn main() -> NodeResult<()> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let persistence: Arc<dyn PersistenceAdapter> = match &args.data_dir {
        Some(dir) => {
            info!("Persisting progression under {}", dir.display());
            Arc::new(FilePersistence::open(dir).await?)
        }
        None => {
            warn!("No data directory given, progression is kept in memory only");
            Arc::new(MemoryPersistence::new())
        }
    };

    let groups: Arc<dyn GroupRegistry> = match &args.data_dir {
        Some(dir) => {
            let registry = FileGroupRegistry::open(dir.join("groups.bin")).await?;
            if registry.group_count().await == 0 {
                for coop in &args.coops {
                    registry.create_group(parse_coop(coop)?).await?;
                }
            } else if !args.coops.is_empty() {
                info!("Keeping stored groups, ignoring --coop");
            }
            Arc::new(registry)
        }
        None => {
            let registry = MemoryGroupRegistry::new();
            for coop in &args.coops {
                registry.create_group(parse_coop(coop)?).await;
            }
            Arc::new(registry)
        }
    };

    let config = SyncConfig {
        lookup_timeout: Duration::from_millis(args.lookup_timeout_ms),
        delivery_timeout: Duration::from_millis(args.delivery_timeout_ms),
        session_timeout: Duration::from_secs(args.session_timeout_secs),
        ..SyncConfig::default()
    };

    let options = NodeOptions {
        process: ProcessId(args.process_id),
        peers: args.peers.into_iter().collect::<HashMap<_, _>>(),
        max_sessions: args.max_sessions,
        config,
        persistence,
        groups,
    };

    let address = format!("{}:{}", args.host, args.port);
    let mut node = NodeServer::bind(&address, options).await?;
    let control = node.control();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down gracefully...");
            let _ = control.send(ServerMessage::Shutdown);
        }
    });

    node.run().await
}
