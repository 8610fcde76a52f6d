//! Capability token: the unguessable path segment that grants access.
//!
//! The token is the only access control the server has, so it is drawn from
//! the OS CSPRNG, kept zeroized, never logged, and compared in constant time.

use std::fmt;

use base64::{prelude::BASE64_URL_SAFE_NO_PAD, Engine};
use rand_core::{OsRng, RngCore};
use subtle::{Choice, ConstantTimeEq};
use zeroize::Zeroizing;

#[derive(Clone)]
pub struct CapabilityToken {
    encoded: Zeroizing<String>,
    entropy_bytes: usize,
}

impl CapabilityToken {
    /// Draw `num_bytes` random bytes and render them URL-safe without padding.
    /// Zero bytes yields the empty token: the URL path is just the file name.
    pub fn generate(num_bytes: usize) -> Self {
        let mut raw = Zeroizing::new(vec![0u8; num_bytes]);
        OsRng.fill_bytes(raw.as_mut_slice());

        Self {
            encoded: Zeroizing::new(BASE64_URL_SAFE_NO_PAD.encode(raw.as_slice())),
            entropy_bytes: num_bytes,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    pub fn is_empty(&self) -> bool {
        self.encoded.is_empty()
    }

    pub fn entropy_bytes(&self) -> usize {
        self.entropy_bytes
    }

    /// Constant-time equality against a request-supplied candidate.
    pub fn matches(&self, candidate: &str) -> bool {
        matches(candidate, self)
    }

    pub(crate) fn ct_matches(&self, candidate: &str) -> Choice {
        candidate.as_bytes().ct_eq(self.encoded.as_bytes())
    }
}

/// Timing does not depend on where the first differing byte is. Only a
/// length mismatch returns early, and the length is public anyway.
pub fn matches(candidate: &str, token: &CapabilityToken) -> bool {
    token.ct_matches(candidate).into()
}

impl fmt::Debug for CapabilityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityToken")
            .field("entropy_bytes", &self.entropy_bytes)
            .finish_non_exhaustive()
    }
}
