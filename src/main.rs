use anyhow::{Result, bail};
use clap::Parser;
use std::io::Write;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::runtime::Builder;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use sospf::command::Command;
use sospf::config::RouterConfig;
use sospf::network::discover_process_address;
use sospf::protocol::listener;
use sospf::types::RouterIdentity;
use sospf::{ConnectOutcome, DisconnectOutcome, Router, UpdateOutcome};

#[derive(Parser)]
#[command(name = "sospf", about = "Simulated link-state router")]
struct Cli {
    #[arg(long)]
    config: PathBuf,

    /// First port to try, overriding the config.
    #[arg(long)]
    port: Option<u16>,

    #[arg(long)]
    simulated_address: Option<Ipv4Addr>,

    /// Takes precedence over RUST_LOG.
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match &cli.log_level {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = RouterConfig::load(&cli.config)?;
    if let Some(port) = cli.port {
        config.process_port = port;
    }
    if let Some(addr) = cli.simulated_address {
        config.simulated_address = addr;
    }
    config.validate()?;

    let rt = Builder::new_multi_thread().enable_all().build()?;
    rt.block_on(run(config))
}

async fn bind(config: &RouterConfig) -> Result<TcpListener> {
    for port in config.candidate_ports() {
        match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => return Ok(listener),
            Err(e) => debug!("Port {} unavailable: {}", port, e),
        }
    }
    bail!("no free port among {} ports from {}", config.port_search.max(1), config.process_port)
}

async fn run(config: RouterConfig) -> Result<()> {
    let listener = bind(&config).await?;
    let port = listener.local_addr()?.port();
    let address = config
        .process_address
        .clone()
        .unwrap_or_else(|| discover_process_address().to_string());
    let identity = RouterIdentity::new(address, port, config.simulated_address);

    let router = Router::new(identity.clone(), config.router_options());
    let server = listener::spawn(router.clone(), listener);
    info!("Router {} ready", identity);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!(">> ");
        std::io::stdout().flush()?;

        // end of input counts as quit
        let Some(line) = lines.next_line().await? else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<Command>() {
            Ok(Command::Quit) => break,
            Ok(command) => execute(&router, command).await,
            Err(e) => println!("{e}"),
        }
    }

    for (remote, result) in router.quit().await {
        match result {
            Ok(()) => println!("Told {} goodbye", remote),
            Err(e) => println!("Could not tell {} goodbye: {}", remote, e),
        }
    }
    server.await?;
    Ok(())
}

async fn execute(router: &Router, command: Command) {
    match command {
        Command::Attach { remote, weight } => match router.attach(remote.clone(), weight).await {
            Ok(slot) => println!("Attached {} on slot {}", remote, slot),
            Err(e) => println!("attach failed: {e}"),
        },
        Command::Connect { remote, weight } => match router.connect(remote.clone(), weight).await {
            Ok(ConnectOutcome::Established { slot }) => println!("Connected to {} on slot {}", remote, slot),
            Ok(ConnectOutcome::Refused) => println!("{} has no free port", remote),
            Err(e) => println!("connect failed: {e}"),
        },
        Command::Start => {
            let results = router.start().await;
            if results.is_empty() {
                println!("No attached neighbours waiting for a handshake");
            }
            for (remote, result) in results {
                match result {
                    Ok(()) => println!("{} is TWO_WAY", remote),
                    Err(e) => println!("handshake with {} failed: {e}", remote),
                }
            }
        }
        Command::Disconnect { port } => match router.disconnect(port).await {
            Ok((remote, DisconnectOutcome::Confirmed)) => println!("Disconnected from {}", remote),
            Ok((remote, DisconnectOutcome::PeerUnaware)) => println!("Disconnected from {}, which did not know us", remote),
            Ok((remote, DisconnectOutcome::PeerFailed(e))) => println!("Disconnected from {} locally; peer unreachable: {e}", remote),
            Err(e) => println!("disconnect failed: {e}"),
        },
        Command::Update { remote, weight } => match router.update_weight(remote.clone(), weight).await {
            Ok(UpdateOutcome::Propagated) => println!("Weight to {} is now {}", remote, weight),
            Ok(UpdateOutcome::LocalOnly) => println!("Weight to {} is now {} (link not established yet)", remote, weight),
            Err(e) => println!("update failed: {e}"),
        },
        Command::Neighbors => {
            let neighbors = router.neighbors().await;
            if neighbors.is_empty() {
                println!("No neighbours");
            }
            for (slot, link) in neighbors {
                println!(
                    "{}: {} port {} weight {} (TWO_WAY for {}s)",
                    slot,
                    link.remote.simulated_address,
                    link.remote.process_port,
                    link.weight,
                    link.status_age_secs()
                );
            }
        }
        Command::Detect { destination } => match router.detect(destination).await {
            Ok(path) => println!("{path}"),
            Err(e) => println!("{e}"),
        },
        Command::Lsd => print!("{}", router.lsdb_dump().await),
        Command::Quit => {}
    }
}
