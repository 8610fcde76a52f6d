//! TLS-over-TCP transport for the single-shot share server.
//!
//! The listener is built from one in-memory certificate and PKCS#8 key and
//! hands out at most one connection: `accept_one` consumes the listener, so
//! the socket is closed before the caller ever sees the peer.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio_rustls::rustls::{self, ServerConfig};
use tokio_rustls::TlsAcceptor;

pub use tokio_rustls::server::TlsStream;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("tls configuration error: {0}")]
    Tls(#[from] rustls::Error),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Build a rustls acceptor serving a single self-signed leaf.
///
/// The key buffer is moved into rustls, not copied. rustls keeps its own
/// parsed signing key for as long as the acceptor lives.
pub fn build_acceptor(cert_der: &[u8], pkcs8_key_der: Vec<u8>) -> Result<TlsAcceptor, TransportError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let chain = vec![CertificateDer::from(cert_der.to_vec())];
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(pkcs8_key_der));

    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(chain, key)?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// A bound TCP socket paired with the acceptor for its certificate.
pub struct TlsListener {
    listener: TcpListener,
    acceptor: TlsAcceptor,
    local_addr: SocketAddr,
}

impl TlsListener {
    /// Build the acceptor, then bind. A bad certificate or key fails before
    /// any socket exists.
    pub async fn bind(
        addr: SocketAddr,
        cert_der: &[u8],
        pkcs8_key_der: Vec<u8>,
    ) -> Result<Self, TransportError> {
        let acceptor = build_acceptor(cert_der, pkcs8_key_der)?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        tracing::debug!("TLS listener bound on {}", local_addr);
        Ok(Self {
            listener,
            acceptor,
            local_addr,
        })
    }

    /// Address actually bound; differs from the requested one when port 0 was asked for.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for one TCP connection and close the listening socket.
    pub async fn accept_one(self) -> Result<IncomingConnection, TransportError> {
        let (stream, peer) = self.listener.accept().await?;
        drop(self.listener);

        tracing::debug!("Accepted TCP connection from {}", peer);
        Ok(IncomingConnection {
            peer,
            stream,
            acceptor: self.acceptor,
        })
    }
}

/// A TCP connection that has not completed the TLS handshake yet.
pub struct IncomingConnection {
    peer: SocketAddr,
    stream: TcpStream,
    acceptor: TlsAcceptor,
}

impl IncomingConnection {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub async fn handshake(self) -> std::io::Result<TlsStream<TcpStream>> {
        self.acceptor.accept(self.stream).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    fn self_signed() -> (Vec<u8>, Vec<u8>) {
        let certified = rcgen::generate_simple_self_signed(vec!["127.0.0.1".to_string()]).unwrap();
        (certified.cert.der().to_vec(), certified.key_pair.serialize_der())
    }

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn test_bind_reports_ephemeral_port() {
        let (cert, key) = self_signed();
        let listener = TlsListener::bind(loopback(), &cert, key).await.unwrap();
        assert_ne!(listener.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn test_bad_key_fails_before_bind() {
        let (cert, _) = self_signed();
        let err = TlsListener::bind(loopback(), &cert, b"not a key".to_vec()).await.err().unwrap();
        assert!(matches!(err, TransportError::Tls(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_port_in_use_is_bind_error() {
        let (cert, key) = self_signed();
        let first = TlsListener::bind(loopback(), &cert, key.clone()).await.unwrap();
        let err = TlsListener::bind(first.local_addr(), &cert, key).await.err().unwrap();
        assert!(matches!(err, TransportError::Bind { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_accept_one_closes_listener() {
        let (cert, key) = self_signed();
        let listener = TlsListener::bind(loopback(), &cert, key).await.unwrap();
        let addr = listener.local_addr();

        let client = tokio::spawn(async move {
            let mut s = TcpStream::connect(addr).await.unwrap();
            s.write_all(b"definitely not a client hello").await.unwrap();
            s.shutdown().await.ok();
        });

        let incoming = listener.accept_one().await.unwrap();
        assert!(incoming.handshake().await.is_err());
        client.await.unwrap();

        assert!(TcpStream::connect(addr).await.is_err());
    }
}
