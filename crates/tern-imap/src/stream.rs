//! The connection socket, with opt-in TLS.
//!
//! A connection is encrypted from the first byte (`imaps`) or starts in
//! plaintext and is upgraded in place after a STARTTLS exchange. Rather
//! than forwarding every poll by hand, the two cases live in a
//! [`tokio_util::either::Either`], which already speaks `AsyncRead` and
//! `AsyncWrite` for whichever side is active.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_util::either::Either;

use crate::{Error, Result};

/// A mail-server socket, plaintext or TLS.
pub struct ImapStream(Either<TcpStream, Box<TlsStream<TcpStream>>>);

impl ImapStream {
    /// Dials `host:port`, performing the TLS handshake immediately when
    /// `tls` is set.
    ///
    /// # Errors
    ///
    /// Fails on DNS, TCP or TLS handshake errors.
    pub async fn open(host: &str, port: u16, tls: bool) -> Result<Self> {
        let tcp = TcpStream::connect((host, port)).await?;
        if tls {
            Ok(Self(Either::Right(Box::new(handshake(tcp, host).await?))))
        } else {
            Ok(Self(Either::Left(tcp)))
        }
    }

    /// Wraps the plaintext socket in TLS, as STARTTLS requires.
    ///
    /// # Errors
    ///
    /// Fails if the handshake fails or the socket is already encrypted.
    pub async fn upgrade_to_tls(self, host: &str) -> Result<Self> {
        match self.0 {
            Either::Left(tcp) => Ok(Self(Either::Right(Box::new(
                handshake(tcp, host).await?,
            )))),
            Either::Right(_) => {
                Err(Error::Protocol("connection is already encrypted".to_string()))
            }
        }
    }

    /// The DER bytes of the server's end-entity certificate, for the trust
    /// prompt. `None` while the socket is plaintext.
    #[must_use]
    pub fn peer_certificate(&self) -> Option<Vec<u8>> {
        let Either::Right(tls) = &self.0 else {
            return None;
        };
        let (_, session) = tls.get_ref();
        let chain = session.peer_certificates()?;
        chain.first().map(|cert| cert.as_ref().to_vec())
    }
}

/// Runs the rustls client handshake against the webpki root set.
async fn handshake(tcp: TcpStream, host: &str) -> Result<TlsStream<TcpStream>> {
    let roots = rustls::RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    let name = ServerName::try_from(host.to_string())?;
    let tls = TlsConnector::from(Arc::new(config))
        .connect(name, tcp)
        .await?;
    Ok(tls)
}

impl AsyncRead for ImapStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().0).poll_read(cx, buf)
    }
}

impl AsyncWrite for ImapStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().0).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().0).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().0).poll_shutdown(cx)
    }
}
