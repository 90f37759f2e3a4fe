//! # reelvec
//!
//! Multimodal movie catalog ingestion and poster similarity search.
//!
//! Records are filtered, their posters fetched and format-checked, embedded
//! together with the overview text, and upserted into a keyspace of a
//! document store that carries a vector index. A small query service embeds
//! a free-text question and returns the nearest posters.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────────────────┐   ┌──────────┐
//! │ JSON     │──▶│ IngestPool (K workers)   │──▶│  SQLite  │
//! │ records  │   │ filter→fetch→check→embed │   │ + vectors│
//! └──────────┘   └──────────────────────────┘   └────┬─────┘
//!      ▲                                             │
//! ┌──────────┐                      ┌────────────────┤
//! │ TMDB     │                      ▼                ▼
//! │ crawler  │                ┌──────────┐     ┌──────────┐
//! └──────────┘                │   CLI    │     │  Web UI  │
//!                             │ (search) │     │ (/search)│
//!                             └──────────┘     └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Raw records, enriched documents, search hits |
//! | [`filter`] | Pre-flight record filter and skip reasons |
//! | [`image_check`] | Poster format sniffing |
//! | [`fetch`] | Poster download |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`pipeline`] | Per-record transform and its outcome |
//! | [`pool`] | Bounded-concurrency worker pool and counters |
//! | [`throttle`] | Dispatch-rate ceiling |
//! | [`progress`] | Progress line and summary formatting |
//! | [`ingest`] | `reel load` orchestration |
//! | [`store`] | Document store trait, SQLite and in-memory backends |
//! | [`search`] | Query service |
//! | [`server`] | Web UI |
//! | [`crawl`] | TMDB source-data crawler |
//! | [`stats`] | `reel init` and `reel stats` |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`logging`] | `tracing` subscriber setup |

pub mod config;
pub mod crawl;
pub mod db;
pub mod embedding;
pub mod fetch;
pub mod filter;
pub mod image_check;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod pool;
pub mod progress;
pub mod search;
pub mod server;
pub mod stats;
pub mod store;
pub mod throttle;
