//! # reel
//!
//! The `reel` binary loads a movie catalog into a vector-indexed document
//! store and answers poster similarity questions over it.
//!
//! ## Usage
//!
//! ```bash
//! reel --config ./config/reel.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `reel init` | Create the database, keyspace and vector index |
//! | `reel load --file <json>` | Validate, embed and upsert every record |
//! | `reel search "<question>"` | One similarity lookup, printed to stdout |
//! | `reel serve` | Start the web UI |
//! | `reel crawl --year <yyyy>` | Build `movie-data-<year>.json` from TMDB |
//! | `reel stats` | Document and index counts per keyspace |
//!
//! ## Examples
//!
//! ```bash
//! # Crawl a year of source data (needs TMDB_TOKEN)
//! reel crawl --year 2023
//!
//! # Load it (needs VERTEX_ACCESS_TOKEN for the vertex provider)
//! reel load --file movie-data-2023.json --ops-ceiling 1.75
//!
//! # Ask
//! reel search "a lone astronaut on a red planet"
//! reel serve --port 8080
//! ```

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use reelvec::config::{self, Config};
use reelvec::progress::ProgressMode;
use reelvec::store::Keyspace;
use reelvec::{crawl, ingest, logging, search, server, stats};

/// Multimodal movie catalog loader and poster search.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/reel.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "reel",
    about = "Load a movie catalog with multimodal embeddings and search it by description",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/reel.toml`. When the file does not exist every
    /// setting takes its default.
    #[arg(long, global = true, default_value = "./config/reel.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Where documents live. Overrides `[db]` and `[keyspace]`.
#[derive(Args, Default)]
struct TargetArgs {
    /// SQLite database file.
    #[arg(long)]
    db: Option<PathBuf>,
    /// Bucket name.
    #[arg(long)]
    bucket: Option<String>,
    /// Scope name.
    #[arg(long)]
    scope: Option<String>,
    /// Collection name.
    #[arg(long)]
    collection: Option<String>,
}

impl TargetArgs {
    fn apply(self, cfg: &mut Config) {
        if let Some(db) = self.db {
            cfg.db.path = db;
        }
        if let Some(bucket) = self.bucket {
            cfg.keyspace.bucket = bucket;
        }
        if let Some(scope) = self.scope {
            cfg.keyspace.scope = scope;
        }
        if let Some(collection) = self.collection {
            cfg.keyspace.collection = collection;
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database, keyspace and vector index.
    ///
    /// Idempotent: running it again reports the existing index.
    Init {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Load a JSON array of movie records.
    ///
    /// Each record is filtered, its poster fetched and checked, embedded
    /// and upserted by id. Failures are counted, never fatal. Exits 1 if the
    /// file is missing or the embedding provider cannot be reached.
    Load {
        /// Input file (JSON array of records).
        #[arg(long, short = 'f')]
        file: PathBuf,

        /// Maximum dispatches per second; 0 disables the ceiling.
        #[arg(long)]
        ops_ceiling: Option<f64>,

        /// Number of concurrent workers.
        #[arg(long)]
        workers: Option<usize>,

        /// Progress output on stderr. Defaults to `human` on a TTY.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// Search posters by a free-text description.
    Search {
        /// The question. Read from stdin when omitted.
        question: Option<String>,

        /// Maximum number of results.
        #[arg(long)]
        limit: Option<usize>,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// Start the web UI.
    Serve {
        /// Listen address, e.g. `127.0.0.1:8080`.
        #[arg(long)]
        bind: Option<String>,

        /// Listen port; keeps the host part of the bind address.
        #[arg(long)]
        port: Option<u16>,

        /// Results per search.
        #[arg(long)]
        limit: Option<usize>,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// Crawl TMDB for one release year and write `movie-data-<year>.json`.
    Crawl {
        /// Release year.
        #[arg(long, short = 'y')]
        year: i32,

        /// Output directory.
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },

    /// Show document and index counts.
    Stats {
        /// SQLite database file.
        #[arg(long)]
        db: Option<PathBuf>,
    },
}

fn with_port(bind: &str, port: u16) -> String {
    match bind.rsplit_once(':') {
        Some((host, _)) => format!("{}:{}", host, port),
        None => format!("{}:{}", bind, port),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut cfg = if cli.config.exists() {
        config::load_config(&cli.config)?
    } else {
        Config::minimal()
    };

    match cli.command {
        Commands::Init { target } => {
            target.apply(&mut cfg);
            start(&cfg)?;
            stats::run_init(&cfg).await?;
        }
        Commands::Load {
            file,
            ops_ceiling,
            workers,
            progress,
            target,
        } => {
            target.apply(&mut cfg);
            if let Some(c) = ops_ceiling {
                cfg.ingest.ops_ceiling = c;
            }
            if let Some(w) = workers {
                cfg.ingest.workers = w;
            }
            start(&cfg)?;
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            ingest::run_load(&cfg, &file, mode).await?;
        }
        Commands::Search {
            question,
            limit,
            target,
        } => {
            target.apply(&mut cfg);
            start(&cfg)?;
            search::run_search(&cfg, question, limit).await?;
        }
        Commands::Serve {
            bind,
            port,
            limit,
            target,
        } => {
            target.apply(&mut cfg);
            if let Some(bind) = bind {
                cfg.server.bind = bind;
            }
            if let Some(port) = port {
                cfg.server.bind = with_port(&cfg.server.bind, port);
            }
            if let Some(limit) = limit {
                cfg.server.result_limit = limit;
            }
            start(&cfg)?;
            server::run_server(&cfg).await?;
        }
        Commands::Crawl { year, out_dir } => {
            start(&cfg)?;
            crawl::run_crawl(&cfg, year, &out_dir).await?;
        }
        Commands::Stats { db } => {
            if let Some(db) = db {
                cfg.db.path = db;
            }
            start(&cfg)?;
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}

/// Re-check the configuration after CLI overrides, then install logging.
fn start(cfg: &Config) -> anyhow::Result<()> {
    cfg.validate()?;
    // Reject a malformed keyspace before touching the database
    cfg.keyspace.keyspace().to_string().parse::<Keyspace>()?;
    logging::init_logging(&cfg.logging)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_replaces_bind_port() {
        assert_eq!(with_port("0.0.0.0:8080", 9000), "0.0.0.0:9000");
        assert_eq!(with_port("localhost", 9000), "localhost:9000");
    }

    #[test]
    fn cli_parses_load() {
        let cli = Cli::try_parse_from([
            "reel",
            "load",
            "--file",
            "movies.json",
            "--ops-ceiling",
            "2.5",
            "--bucket",
            "films",
        ])
        .unwrap();
        match cli.command {
            Commands::Load {
                file,
                ops_ceiling,
                target,
                ..
            } => {
                assert_eq!(file, PathBuf::from("movies.json"));
                assert_eq!(ops_ceiling, Some(2.5));
                assert_eq!(target.bucket.as_deref(), Some("films"));
            }
            _ => panic!("expected load"),
        }
    }
}
