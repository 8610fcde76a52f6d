#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pinshare_core::{
    CapabilityToken, Credential, KeyAlgorithm, ListeningServer, PublicKeyPin, ShareConfig,
    SingleShotServer,
};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::crypto::{self, CryptoProvider};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{self, ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use x509_parser::prelude::{FromDer, X509Certificate};

/// Accepts exactly the server whose public key hashes to `pin`, the way
/// `curl --pinnedpubkey` does.
#[derive(Debug)]
pub struct PinnedKey {
    pin: PublicKeyPin,
    provider: Arc<CryptoProvider>,
}

impl PinnedKey {
    pub fn new(pin: PublicKeyPin) -> Self {
        Self {
            pin,
            provider: Arc::new(crypto::ring::default_provider()),
        }
    }
}

impl ServerCertVerifier for PinnedKey {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let (_, cert) = X509Certificate::from_der(end_entity)
            .map_err(|_| rustls::Error::InvalidCertificate(rustls::CertificateError::BadEncoding))?;
        if PublicKeyPin::from_spki_der(cert.public_key().raw) == self.pin {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::InvalidCertificate(
                rustls::CertificateError::ApplicationVerificationFailure,
            ))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}

#[derive(Debug)]
pub struct HttpReply {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

/// Issue one `GET raw_path` over a pinned TLS connection and read until close.
pub async fn fetch(addr: SocketAddr, pin: &PublicKeyPin, raw_path: &str) -> std::io::Result<HttpReply> {
    fetch_with(addr, pin, "GET", raw_path).await
}

pub async fn fetch_with(
    addr: SocketAddr,
    pin: &PublicKeyPin,
    method: &str,
    raw_path: &str,
) -> std::io::Result<HttpReply> {
    let mut tls = send_request(addr, pin, method, raw_path).await?;

    let mut raw = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        match tls.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => raw.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        }
    }
    parse_reply(&raw)
}

/// `GET raw_path`, firing `reached` once `threshold` bytes have arrived,
/// then pausing for `stall` before reading on. Returns how many bytes
/// came in before the connection ended, however it ended.
pub async fn fetch_slowly(
    addr: SocketAddr,
    pin: &PublicKeyPin,
    raw_path: &str,
    threshold: usize,
    stall: Duration,
    reached: oneshot::Sender<()>,
) -> usize {
    let mut tls = send_request(addr, pin, "GET", raw_path).await.unwrap();

    let mut reached = Some(reached);
    let mut received = 0;
    let mut buf = [0u8; 8192];
    loop {
        match tls.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => received += n,
        }
        if received >= threshold {
            if let Some(tx) = reached.take() {
                let _ = tx.send(());
                tokio::time::sleep(stall).await;
            }
        }
    }
    received
}

async fn send_request(
    addr: SocketAddr,
    pin: &PublicKeyPin,
    method: &str,
    raw_path: &str,
) -> std::io::Result<TlsStream<TcpStream>> {
    let provider = Arc::new(crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(std::io::Error::other)?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(PinnedKey::new(pin.clone())))
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));

    let tcp = TcpStream::connect(addr).await?;
    let server_name = ServerName::from(addr.ip());
    let mut tls = connector.connect(server_name, tcp).await?;

    let request = format!(
        "{} {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        method, raw_path, addr
    );
    tls.write_all(request.as_bytes()).await?;
    tls.flush().await?;
    Ok(tls)
}

fn parse_reply(raw: &[u8]) -> std::io::Result<HttpReply> {
    let invalid = |msg: &str| std::io::Error::new(std::io::ErrorKind::InvalidData, msg.to_string());

    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or_else(|| invalid("no header terminator"))?;
    let head = std::str::from_utf8(&raw[..split]).map_err(|_| invalid("non-utf8 head"))?;
    let mut lines = head.split("\r\n");

    let status = lines
        .next()
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| invalid("bad status line"))?;

    let headers = lines
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    Ok(HttpReply {
        status,
        headers,
        body: raw[split + 4..].to_vec(),
    })
}

/// A file on disk plus everything needed to build a server for it.
pub struct Fixture {
    pub dir: TempDir,
    pub path: PathBuf,
    pub token: CapabilityToken,
}

impl Fixture {
    pub fn new(name: &str, content: &[u8], token_bytes: usize) -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        Self {
            dir,
            path,
            token: CapabilityToken::generate(token_bytes),
        }
    }

    pub fn config(&self) -> ShareConfig {
        ShareConfig::new(&self.path)
            .with_bind("127.0.0.1".parse().unwrap(), 0)
            .with_algorithm(KeyAlgorithm::EcdsaP256)
            .with_token_bytes(self.token.entropy_bytes())
    }

    pub async fn listen(&self, config: ShareConfig) -> ListeningServer {
        let target = config.validate().unwrap();
        let credential =
            Credential::generate(&config.bind_ip.to_string(), config.algorithm).unwrap();
        SingleShotServer::new(config, target, credential, self.token.clone())
            .bind()
            .await
            .unwrap()
    }

    /// `/{token}/{suffix}`
    pub fn path_with(&self, suffix: &str) -> String {
        format!("/{}/{}", self.token.as_str(), suffix)
    }
}
