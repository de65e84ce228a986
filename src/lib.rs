//! # Paperdex
//!
//! A conference paper ingestion and semantic retrieval pipeline.
//!
//! Paperdex crawls machine-learning conference proceedings (NeurIPS, PMLR,
//! ICLR via OpenReview), normalizes paper metadata, embeds abstracts for
//! vector similarity search, and answers ranked full-text queries, all
//! through a CLI and an HTTP API.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌───────────┐
//! │ Connectors   │──▶│ Coordinator  │──▶│  SQLite   │
//! │ NeurIPS/PMLR │   │ fetch→embed  │   │ FTS5+Vec  │
//! │ OpenReview   │   │ (bounded)    │   └────┬──────┘
//! └─────────────┘   └──────┬───────┘        │
//!                          │ PDFs       ┌───┴──────┐
//!                    ┌─────▼─────┐      ▼          ▼
//!                    │  MinIO/S3 │ ┌──────────┐ ┌──────────┐
//!                    └───────────┘ │   CLI    │ │   HTTP   │
//!                                  │  (pdx)   │ │  (axum)  │
//!                                  └──────────┘ └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! pdx init                                  # create database
//! pdx crawl neurips --volume 2023           # ingest a proceedings volume
//! pdx search "graph neural networks"        # ranked full-text search
//! pdx search "attention" --mode similarity  # vector similarity search
//! pdx serve                                 # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types |
//! | [`connector`] | Source connector trait + conference registry |
//! | [`connector_neurips`] | NeurIPS proceedings connector |
//! | [`connector_pmlr`] | PMLR volume connector |
//! | [`connector_openreview`] | OpenReview (ICLR) API connector |
//! | [`chunk`] | Paragraph-boundary text chunking |
//! | [`embedding`] | Embedding provider abstraction + vector math |
//! | [`coordinator`] | Concurrent crawl orchestration |
//! | [`store`] | Persistence gateway and retrieval engine |
//! | [`object_store`] | S3-compatible PDF storage |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |

pub mod chunk;
pub mod config;
pub mod connector;
pub mod connector_neurips;
pub mod connector_openreview;
pub mod connector_pmlr;
pub mod connectors_cmd;
pub mod coordinator;
pub mod db;
pub mod embedding;
pub mod error;
pub mod migrate;
pub mod models;
pub mod object_store;
pub mod server;
pub mod store;
