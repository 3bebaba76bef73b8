// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Server side transport streams and listening sockets.

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::rustls::server::AllowAnyAuthenticatedClient;
use tokio_rustls::rustls::{Certificate, PrivateKey, RootCertStore, ServerConfig};
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

use crate::config;
use crate::error::{Error, ErrorKind};

/// Each Stream represents a duplex socket connection to one client.
#[derive(Debug)]
pub enum Stream {
    Mqtt(TcpStream),
    Mqtts(Box<TlsStream<TcpStream>>),
}

impl Stream {
    /// Read some bytes from stream, appending to `buf`.
    ///
    /// Returns the number of bytes read; 0 means the peer closed the
    /// connection.
    ///
    /// # Errors
    ///
    /// Returns error if stream/socket gets error.
    pub async fn read_buf(&mut self, buf: &mut Vec<u8>) -> Result<usize, Error> {
        match self {
            Self::Mqtt(tcp_stream) => Ok(tcp_stream.read_buf(buf).await?),
            Self::Mqtts(tls_stream) => Ok(tls_stream.read_buf(buf).await?),
        }
    }

    /// Write the whole buffer to stream.
    ///
    /// # Errors
    ///
    /// Returns error if socket/stream gets error.
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize, Error> {
        match self {
            Self::Mqtt(tcp_stream) => {
                tcp_stream.write_all(buf).await?;
                Ok(buf.len())
            }
            Self::Mqtts(tls_stream) => {
                tls_stream.write_all(buf).await?;
                Ok(buf.len())
            }
        }
    }
}

/// A bound listening socket, plain or TLS.
pub enum Acceptor {
    Mqtt(TcpListener),
    Mqtts(TcpListener, TlsAcceptor),
}

impl Acceptor {
    /// Bind the address in `listener_config`.
    ///
    /// # Errors
    ///
    /// Returns error if binding fails or TLS files are invalid.
    pub async fn bind(listener_config: &config::Listener) -> Result<Self, Error> {
        let tcp_listener = TcpListener::bind(&listener_config.address).await?;
        match listener_config.protocol {
            config::Protocol::Mqtt => Ok(Self::Mqtt(tcp_listener)),
            config::Protocol::Mqtts => {
                let cert_file = listener_config.cert_file.as_ref().ok_or_else(|| {
                    Error::new(ErrorKind::CertError, "cert_file is required for mqtts")
                })?;
                let key_file = listener_config.key_file.as_ref().ok_or_else(|| {
                    Error::new(ErrorKind::CertError, "key_file is required for mqtts")
                })?;
                let acceptor = load_tls_acceptor(
                    cert_file,
                    key_file,
                    listener_config.require_client_certificate,
                )?;
                Ok(Self::Mqtts(tcp_listener, acceptor))
            }
        }
    }

    /// Wait for the next client connection.
    ///
    /// # Errors
    ///
    /// Returns error if the accept or the TLS handshake fails.
    pub async fn accept(&self) -> Result<(Stream, SocketAddr), Error> {
        match self {
            Self::Mqtt(tcp_listener) => {
                let (tcp_stream, address) = tcp_listener.accept().await?;
                Ok((Stream::Mqtt(tcp_stream), address))
            }
            Self::Mqtts(tcp_listener, acceptor) => {
                let (tcp_stream, address) = tcp_listener.accept().await?;
                let tls_stream = acceptor.accept(tcp_stream).await?;
                Ok((Stream::Mqtts(Box::new(tls_stream)), address))
            }
        }
    }
}

fn load_certs(path: &Path) -> Result<Vec<Certificate>, Error> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader).map_err(|err| {
        Error::from_string(
            ErrorKind::CertError,
            format!("Failed to parse cert file {path:?}, {err:?}"),
        )
    })?;
    Ok(certs.into_iter().map(Certificate).collect())
}

fn load_private_key(path: &Path) -> Result<PrivateKey, Error> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut keys = rustls_pemfile::pkcs8_private_keys(&mut reader).map_err(|err| {
        Error::from_string(
            ErrorKind::CertError,
            format!("Failed to parse key file {path:?}, {err:?}"),
        )
    })?;
    keys.pop().map(PrivateKey).ok_or_else(|| {
        Error::from_string(
            ErrorKind::CertError,
            format!("No pkcs8 private key found in {path:?}"),
        )
    })
}

fn load_tls_acceptor(
    cert_file: &Path,
    key_file: &Path,
    require_client_certificate: bool,
) -> Result<TlsAcceptor, Error> {
    let certs = load_certs(cert_file)?;
    let key = load_private_key(key_file)?;

    let builder = ServerConfig::builder().with_safe_defaults();
    let config = if require_client_certificate {
        let mut roots = RootCertStore::empty();
        for cert in &certs {
            roots.add(cert).map_err(|err| {
                Error::from_string(
                    ErrorKind::CertError,
                    format!("Failed to add cert to root store, {err:?}"),
                )
            })?;
        }
        builder
            .with_client_cert_verifier(AllowAnyAuthenticatedClient::new(roots))
            .with_single_cert(certs, key)
    } else {
        builder.with_no_client_auth().with_single_cert(certs, key)
    }
    .map_err(|err| {
        Error::from_string(ErrorKind::CertError, format!("Invalid TLS config, {err:?}"))
    })?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}
