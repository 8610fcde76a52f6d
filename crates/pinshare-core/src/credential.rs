//! Per-run TLS credential.
//!
//! - Fresh key pair on every run: RSA-2048 (default) or ECDSA P-256.
//! - Self-signed leaf, no chain, valid for one day, SAN = advertised address.
//! - The public-key pin is base64(SHA-256(SubjectPublicKeyInfo DER)), the
//!   form curl accepts as `--pinnedpubkey sha256//<pin>`.
//!
//! Nothing here touches the filesystem. The private key lives in a zeroizing
//! buffer and is gone when the process exits.

use std::fmt;

use base64::{prelude::BASE64_STANDARD, Engine};
use rand_core::{OsRng, RngCore};
use rcgen::{CertificateParams, DnType, KeyPair, SerialNumber};
use rsa::pkcs8::EncodePrivateKey;
use rsa::RsaPrivateKey;
use rustls_pki_types::PrivatePkcs8KeyDer;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use x509_parser::prelude::{FromDer, X509Certificate};
use zeroize::Zeroizing;

use crate::config::KeyAlgorithm;
use crate::error::ShareError;

/// Lifetime of the certificate. It is thrown away at exit anyway.
pub const CERT_VALIDITY: time::Duration = time::Duration::days(1);

const RSA_BITS: usize = 2048;

pub struct Credential {
    algorithm: KeyAlgorithm,
    subject_alt_name: String,
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
    certificate_der: Vec<u8>,
    spki_digest: [u8; 32],
    private_key_der: Zeroizing<Vec<u8>>,
}

impl Credential {
    /// Generate a key pair of `algorithm` and a self-signed certificate for
    /// `bind_address` (an IP literal or a host name).
    pub fn generate(bind_address: &str, algorithm: KeyAlgorithm) -> Result<Self, ShareError> {
        if bind_address.is_empty() {
            return Err(ShareError::Credential("empty subject address".into()));
        }

        tracing::debug!("Generating {} key pair", algorithm);
        let key_pair = generate_key_pair(algorithm)?;
        let credential = Self::self_sign(bind_address, algorithm, &key_pair)?;

        tracing::info!(
            "Generated {} certificate for {} (key {})",
            algorithm,
            bind_address,
            credential.fingerprint()
        );
        Ok(credential)
    }

    fn self_sign(
        bind_address: &str,
        algorithm: KeyAlgorithm,
        key_pair: &KeyPair,
    ) -> Result<Self, ShareError> {
        // IP literals become iPAddress SANs, anything else a dNSName.
        let mut params = CertificateParams::new(vec![bind_address.to_string()])
            .map_err(ShareError::credential)?;
        params
            .distinguished_name
            .push(DnType::CommonName, bind_address.to_string());
        params.serial_number = Some(SerialNumber::from(OsRng.next_u64() >> 1));

        let not_before = OffsetDateTime::now_utc();
        let not_after = not_before + CERT_VALIDITY;
        params.not_before = not_before;
        params.not_after = not_after;

        let cert = params.self_signed(key_pair).map_err(ShareError::credential)?;
        let certificate_der = cert.der().to_vec();
        let spki_digest = spki_digest(&certificate_der)?;

        Ok(Self {
            algorithm,
            subject_alt_name: bind_address.to_string(),
            not_before,
            not_after,
            certificate_der,
            spki_digest,
            private_key_der: Zeroizing::new(key_pair.serialize_der()),
        })
    }

    /// Pin of the certificate's public key.
    pub fn pin(&self) -> PublicKeyPin {
        PublicKeyPin::from_digest(&self.spki_digest)
    }

    /// Short hex form of the key digest, for log lines.
    pub fn fingerprint(&self) -> String {
        hex::encode(&self.spki_digest[..4])
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    pub fn subject_alt_name(&self) -> &str {
        &self.subject_alt_name
    }

    pub fn not_before(&self) -> OffsetDateTime {
        self.not_before
    }

    pub fn not_after(&self) -> OffsetDateTime {
        self.not_after
    }

    pub fn certificate_der(&self) -> &[u8] {
        &self.certificate_der
    }

    /// Hand the PKCS#8 private key over to the TLS acceptor. The buffer is
    /// moved out, leaving the credential without a key.
    pub(crate) fn take_private_key(&mut self) -> Vec<u8> {
        std::mem::take(&mut *self.private_key_der)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("algorithm", &self.algorithm)
            .field("subject_alt_name", &self.subject_alt_name)
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}

fn generate_key_pair(algorithm: KeyAlgorithm) -> Result<KeyPair, ShareError> {
    match algorithm {
        KeyAlgorithm::EcdsaP256 => {
            KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).map_err(ShareError::credential)
        }
        KeyAlgorithm::Rsa2048 => {
            let rsa = RsaPrivateKey::new(&mut OsRng, RSA_BITS).map_err(ShareError::credential)?;
            let pkcs8 = rsa.to_pkcs8_der().map_err(ShareError::credential)?;
            let der = PrivatePkcs8KeyDer::from(pkcs8.as_bytes());
            KeyPair::from_pkcs8_der_and_sign_algo(&der, &rcgen::PKCS_RSA_SHA256)
                .map_err(ShareError::credential)
        }
    }
}

/// SHA-256 of the SubjectPublicKeyInfo inside a DER certificate.
fn spki_digest(certificate_der: &[u8]) -> Result<[u8; 32], ShareError> {
    let (_, cert) = X509Certificate::from_der(certificate_der).map_err(ShareError::credential)?;
    Ok(Sha256::digest(cert.public_key().raw).into())
}

/// base64(SHA-256(SubjectPublicKeyInfo DER)). Display only, never used to
/// authorize anything server side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublicKeyPin(String);

impl PublicKeyPin {
    pub fn from_spki_der(spki_der: &[u8]) -> Self {
        Self::from_digest(&Sha256::digest(spki_der).into())
    }

    fn from_digest(digest: &[u8; 32]) -> Self {
        Self(BASE64_STANDARD.encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `sha256//<pin>`, as pinned-key HTTP clients expect it.
    pub fn curl_form(&self) -> String {
        format!("sha256//{}", self.0)
    }

    pub fn digest(&self) -> Result<[u8; 32], ShareError> {
        let bytes = BASE64_STANDARD
            .decode(&self.0)
            .map_err(ShareError::credential)?;
        bytes
            .try_into()
            .map_err(|v: Vec<u8>| ShareError::Credential(format!("pin decodes to {} bytes", v.len())))
    }
}

impl fmt::Display for PublicKeyPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
