//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. Ports are interfaces that the sync engine
//! depends on, but whose implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`IMailSource`] - Remote mailbox: folder listing, paged message listing,
//!   paged delta feed, raw content download
//! - [`ICredentialProvider`] - Bearer credential supply
//! - [`IStateStore`] / [`IStateTransaction`] - Transactional state database

pub mod credentials;
pub mod mail_source;
pub mod state_store;

pub use credentials::{ICredentialProvider, StaticTokenProvider};
pub use mail_source::{ChangePage, DeltaEntry, IMailSource, RemoteFolder, RemoteMessage, SourceError};
pub use state_store::{IStateStore, IStateTransaction, MessageCounts};
