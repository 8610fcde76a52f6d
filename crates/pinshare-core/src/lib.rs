//! pinshare core - one file, one download, one run.
//!
//! Each run generates a throwaway TLS credential and a capability token,
//! serves a single file at `https://{addr}/{token}/{filename}` to at most one
//! client, and stops. Clients authenticate the server by pinning the printed
//! public-key digest instead of trusting a certificate authority.

pub mod config;
pub mod credential;
pub mod error;
pub mod server;
pub mod target;
pub mod token;
pub mod url;

// Re-export commonly used types
pub use config::{KeyAlgorithm, ShareConfig, DEFAULT_TOKEN_BYTES};
pub use credential::{Credential, PublicKeyPin};
pub use error::ShareError;
pub use server::{ListeningServer, ServeOutcome, ShareInfo, SingleShotServer};
pub use target::ShareTarget;
pub use token::CapabilityToken;
