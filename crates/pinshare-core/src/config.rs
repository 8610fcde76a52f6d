use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ShareError;
use crate::target::ShareTarget;

/// Default token entropy in bytes.
pub const DEFAULT_TOKEN_BYTES: usize = 64;

/// Upper bound on token entropy; anything larger only bloats the URL.
pub const MAX_TOKEN_BYTES: usize = 1024;

/// Key type of the per-run certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyAlgorithm {
    #[default]
    Rsa2048,
    EcdsaP256,
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyAlgorithm::Rsa2048 => write!(f, "RSA-2048"),
            KeyAlgorithm::EcdsaP256 => write!(f, "ECDSA-P256"),
        }
    }
}

impl FromStr for KeyAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rsa" | "rsa2048" | "rsa-2048" => Ok(KeyAlgorithm::Rsa2048),
            "ecdsa" | "ecdsa-p256" | "p256" | "ec" => Ok(KeyAlgorithm::EcdsaP256),
            other => Err(format!("unknown key algorithm '{}' (expected rsa or ecdsa)", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareConfig {
    /// File to share
    pub file: PathBuf,

    /// Address to bind and advertise in the certificate and URL
    pub bind_ip: IpAddr,

    /// Port to listen on (0 = ephemeral)
    pub port: u16,

    /// Token entropy in bytes (0 = no token, reduced security)
    pub token_bytes: usize,

    /// Certificate key type
    pub algorithm: KeyAlgorithm,

    /// Give up waiting after this many seconds
    pub timeout_secs: Option<u64>,
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::new(),
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            token_bytes: DEFAULT_TOKEN_BYTES,
            algorithm: KeyAlgorithm::default(),
            timeout_secs: None,
        }
    }
}

impl ShareConfig {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            ..Default::default()
        }
    }

    pub fn with_bind(mut self, bind_ip: IpAddr, port: u16) -> Self {
        self.bind_ip = bind_ip;
        self.port = port;
        self
    }

    pub fn with_algorithm(mut self, algorithm: KeyAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_token_bytes(mut self, token_bytes: usize) -> Self {
        self.token_bytes = token_bytes;
        self
    }

    pub fn with_timeout(mut self, timeout_secs: Option<u64>) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.port)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Check everything that can be checked before generating key material and
    /// return the located file.
    pub fn validate(&self) -> Result<ShareTarget, ShareError> {
        if self.token_bytes > MAX_TOKEN_BYTES {
            return Err(ShareError::Config(format!(
                "token length {} exceeds the maximum of {} bytes",
                self.token_bytes, MAX_TOKEN_BYTES
            )));
        }
        if self.timeout_secs == Some(0) {
            return Err(ShareError::Config("timeout must be at least one second".into()));
        }
        if self.bind_ip.is_unspecified() {
            return Err(ShareError::Config(format!(
                "{} cannot be advertised in a certificate; pick a concrete address",
                self.bind_ip
            )));
        }
        ShareTarget::locate(&self.file)
    }
}
