//! MeshKV CLI Client
//!
//! Command-line interface for poking at a MeshKV cluster.

use std::time::Duration;

use clap::{Parser, Subcommand};

use meshkv_client::{Cluster, Config, Key};

/// MeshKV CLI
#[derive(Parser, Debug)]
#[command(name = "meshkv-cli")]
#[command(about = "CLI for the MeshKV key-value store")]
struct Args {
    /// Seed hosts, comma-separated (host:port or [ipv6]:port)
    #[arg(short, long, default_value = "127.0.0.1:3000")]
    seeds: String,

    /// Namespace
    #[arg(short, long, default_value = "test")]
    namespace: String,

    /// Set name
    #[arg(long, default_value = "demo")]
    set: String,

    /// Seconds to wait for the cluster to become ready
    #[arg(long, default_value_t = 5)]
    ready_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Set {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },

    /// Show cluster statistics
    Stats,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "meshkv_client=info".into()),
        )
        .init();

    let args = Args::parse();

    let config = match Config::builder()
        .seed_hosts(&args.seeds)
        .and_then(|b| b.build())
    {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Bad configuration: {}", e);
            std::process::exit(1);
        }
    };

    let cluster = match Cluster::connect(config) {
        Ok(cluster) => cluster,
        Err(e) => {
            eprintln!("Failed to connect: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = cluster.wait_ready(Duration::from_secs(args.ready_timeout)) {
        eprintln!("Cluster not ready: {}", e);
        std::process::exit(1);
    }

    let result = match args.command {
        Commands::Get { key } => {
            let key = Key::new(&args.namespace, &args.set, key.as_bytes());
            cluster.get(None, None, &key).map(|record| match record {
                Some(record) => match record.value {
                    Some(value) => println!("{}", String::from_utf8_lossy(&value)),
                    None => println!("(empty)"),
                },
                None => println!("(not found)"),
            })
        }
        Commands::Set { key, value } => {
            let key = Key::new(&args.namespace, &args.set, key.as_bytes());
            cluster.put(None, None, &key, value.as_bytes()).map(|record| {
                println!("OK (generation {})", record.generation);
            })
        }
        Commands::Del { key } => {
            let key = Key::new(&args.namespace, &args.set, key.as_bytes());
            cluster.delete(None, None, &key).map(|existed| {
                println!("{}", if existed { "OK" } else { "(not found)" });
            })
        }
        Commands::Stats => {
            let stats = cluster.stats();
            println!("generation: {}", stats.generation);
            for node in &stats.nodes {
                println!(
                    "node {} at {} active={} connections={}",
                    node.name, node.host, node.active, node.open_connections
                );
                for (category, samples) in &node.samples {
                    if *samples > 0 {
                        println!("  {}: {} samples", category, samples);
                    }
                }
            }
            Ok(())
        }
    };

    cluster.close();

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
