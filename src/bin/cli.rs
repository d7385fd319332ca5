//! AtlasCluster CLI
//!
//! Command-line interface for inspecting and editing clusters in a data
//! directory. Each mutating command runs in its own atomic operation.

use std::sync::Arc;

use atlascluster::{Config, Engine, PaginatedCluster, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

/// AtlasCluster CLI
#[derive(Parser, Debug)]
#[command(name = "atlascluster-cli")]
#[command(about = "CLI for AtlasCluster paginated record storage")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./atlascluster_data")]
    data_dir: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List clusters in the data directory
    List,

    /// Create a cluster
    Create {
        /// Cluster name
        cluster: String,
    },

    /// Delete a cluster and its files
    Drop {
        /// Cluster name
        cluster: String,
    },

    /// Show cluster counters
    Stats {
        /// Cluster name
        cluster: String,
    },

    /// Store a new record and print its position
    Put {
        /// Cluster name
        cluster: String,

        /// Record payload
        value: String,

        /// Record type byte
        #[arg(short = 't', long, default_value = "0")]
        record_type: u8,

        /// Record version
        #[arg(short = 'v', long, default_value = "0")]
        version: i32,
    },

    /// Read the record at a position
    Get {
        /// Cluster name
        cluster: String,

        /// Cluster position
        position: u64,
    },

    /// Replace the record at a position
    Update {
        /// Cluster name
        cluster: String,

        /// Cluster position
        position: u64,

        /// New payload
        value: String,

        /// Record type byte
        #[arg(short = 't', long, default_value = "0")]
        record_type: u8,

        /// Record version
        #[arg(short = 'v', long, default_value = "0")]
        version: i32,
    },

    /// Delete the record at a position
    Del {
        /// Cluster name
        cluster: String,

        /// Cluster position
        position: u64,
    },

    /// Walk occupied positions in order
    Scan {
        /// Cluster name
        cluster: String,

        /// Position to start from
        #[arg(short, long)]
        from: Option<u64>,

        /// Walk from high to low positions
        #[arg(short, long)]
        reverse: bool,
    },
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,atlascluster=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::builder().data_dir(&args.data_dir).build();

    if let Err(e) = run(config, args.command) {
        tracing::error!("{}", e);
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(config: Config, command: Commands) -> Result<()> {
    let engine = Engine::open(config)?;

    match command {
        Commands::List => {
            for name in engine.cluster_names()? {
                println!("{}", name);
            }
        }
        Commands::Create { cluster } => {
            engine.create_cluster(&cluster)?;
            println!("created {}", cluster);
        }
        Commands::Drop { cluster } => {
            engine.drop_cluster(&cluster)?;
            println!("dropped {}", cluster);
        }
        Commands::Stats { cluster } => {
            let stats = engine.open_cluster(&cluster)?.statistics()?;
            println!("entries:        {}", stats.entries);
            println!("positions_size: {}", stats.positions_size);
            println!("free_positions: {}", stats.free_positions);
            println!("data_pages:     {}", stats.data_pages);
            println!("map_pages:      {}", stats.map_pages);
        }
        Commands::Put {
            cluster,
            value,
            record_type,
            version,
        } => {
            let cluster = engine.open_cluster(&cluster)?;
            let position = engine.manager().execute("cli put", |op| {
                cluster.create_record(op, value.as_bytes(), version, record_type, None)
            })?;
            println!("{}", position.cluster_position);
        }
        Commands::Get { cluster, position } => {
            let cluster = engine.open_cluster(&cluster)?;
            match cluster.read_record(position)? {
                Some(record) => println!(
                    "type={} version={} {}",
                    record.record_type,
                    record.version,
                    String::from_utf8_lossy(&record.buffer)
                ),
                None => println!("(nil)"),
            }
        }
        Commands::Update {
            cluster,
            position,
            value,
            record_type,
            version,
        } => {
            let cluster = engine.open_cluster(&cluster)?;
            let updated = engine.manager().execute("cli update", |op| {
                cluster.update_record(op, position, value.as_bytes(), version, record_type)
            })?;
            println!("{}", if updated { "OK" } else { "(not updated)" });
        }
        Commands::Del { cluster, position } => {
            let cluster = engine.open_cluster(&cluster)?;
            let deleted = engine
                .manager()
                .execute("cli delete", |op| cluster.delete_record(op, position))?;
            println!("{}", if deleted { "OK" } else { "(nil)" });
        }
        Commands::Scan {
            cluster,
            from,
            reverse,
        } => {
            let cluster = engine.open_cluster(&cluster)?;
            scan(&cluster, from, reverse)?;
        }
    }

    engine.close()
}

/// Print every occupied position, following batches until the map runs out
fn scan(cluster: &Arc<PaginatedCluster>, from: Option<u64>, reverse: bool) -> Result<()> {
    let mut batch = match (from, reverse) {
        (Some(from), false) => cluster.ceiling_positions(from)?,
        (None, false) => cluster.ceiling_positions(0)?,
        (Some(from), true) => cluster.floor_positions(from)?,
        (None, true) => cluster.floor_positions(u64::MAX)?,
    };

    while let Some(last) = batch.last().copied() {
        for position in &batch {
            println!(
                "{}\ttype={}\tversion={}\tsize={}",
                position.cluster_position,
                position.record_type,
                position.record_version,
                position.record_size
            );
        }
        batch = if reverse {
            cluster.lower_positions(last.cluster_position)?
        } else {
            cluster.higher_positions(last.cluster_position)?
        };
    }
    Ok(())
}
