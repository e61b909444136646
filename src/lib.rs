//! # Toolscan
//!
//! An AI-assisted compliance scanner for third-party developer tools.
//!
//! Toolscan takes a list of tool names, locates and analyzes each tool's
//! Terms of Service with a chat-completions model, reconciles the result
//! with a curated knowledge base, optionally scores the tool across five
//! compliance dimensions, and persists one report per tool in SQLite.
//! Everything is exposed through a CLI and a JSON HTTP API.
//!
//! ## Pipeline
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌───────────┐   ┌──────────┐
//! │  Batch    │──▶│ TOS fetch  │──▶│ Knowledge │──▶│ Scoring   │
//! │ of tools  │   │ + analysis │   │   merge    │   │ + report  │
//! └──────────┘   └───────────┘   └───────────┘   └────┬─────┘
//!                                                      │
//!                                  ┌───────────────────┤
//!                                  ▼                   ▼
//!                             ┌──────────┐       ┌──────────┐
//!                             │   CLI    │       │   HTTP   │
//!                             │(toolscan)│       │  (axum)  │
//!                             └──────────┘       └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`ai`] | AI provider abstraction and response parsing |
//! | [`tos`] | Terms of Service resolution |
//! | [`knowledge`] | Knowledge base lookup and merge |
//! | [`diff`] | Analysis change sets |
//! | [`scoring`] | Compliance scoring and report persistence |
//! | [`scan`] | Scan orchestration and task state |
//! | [`report`] | JSON report rendering and export |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod ai;
pub mod config;
pub mod db;
pub mod diff;
pub mod knowledge;
pub mod migrate;
pub mod models;
pub mod report;
pub mod scan;
pub mod scoring;
pub mod server;
pub mod store;
pub mod tos;
