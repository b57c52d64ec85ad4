//! mailmirror Core - Domain logic and port definitions
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `Folder`, `MessageRecord`, `SyncState`, `Transformation`,
//!   attachment and archive-extraction records
//! - **Port definitions** - Traits for adapters: `IMailSource`, `ICredentialProvider`,
//!   `IStateStore` / `IStateTransaction`
//! - **Configuration** - YAML-backed typed configuration with validation
//!
//! # Architecture
//!
//! The domain module holds pure data and validation with no I/O.
//! Ports define the trait interfaces that adapter crates implement:
//! `mailmirror-cache` (SQLite state store), `mailmirror-graph` (remote mailbox),
//! and the engine in `mailmirror-sync` drives them.

pub mod config;
pub mod domain;
pub mod ports;
