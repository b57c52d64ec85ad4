//! mailmirror Graph - Microsoft Graph mail source
//!
//! Provides an [`IMailSource`](mailmirror_core::ports::IMailSource) adapter for:
//! - Recursive mail folder listing
//! - Per-folder message delta queries (full listing and incremental pulls)
//! - Raw MIME content download
//!
//! ## Modules
//!
//! - [`auth`] - Environment-variable bearer credential provider
//! - [`client`] - Authenticated HTTP client and response classification
//! - [`mail`] - The mail source adapter
//! - [`rate_limit`] - `Retry-After` parsing

pub mod auth;
pub mod client;
pub mod mail;
pub mod rate_limit;

pub use auth::EnvTokenProvider;
pub use client::GraphClient;
pub use mail::GraphMailSource;
