// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Client side transport stream of a bridge.

use std::convert::TryFrom;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::{ClientConfig, OwnedTrustAnchor, RootCertStore, ServerName};
use tokio_rustls::TlsConnector;

use crate::error::{Error, ErrorKind};

/// Duplex connection to the remote broker.
#[derive(Debug)]
pub enum BridgeStream {
    Tcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl BridgeStream {
    /// Open a connection to `host:port`, with TLS when requested.
    ///
    /// # Errors
    ///
    /// Returns error if the connection or the TLS handshake fails.
    pub async fn connect(host: &str, port: u16, use_tls: bool) -> Result<Self, Error> {
        let tcp_stream = TcpStream::connect((host, port)).await?;
        if !use_tls {
            return Ok(Self::Tcp(tcp_stream));
        }

        let mut roots = RootCertStore::empty();
        roots.add_server_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.0.iter().map(|anchor| {
            OwnedTrustAnchor::from_subject_spki_name_constraints(
                anchor.subject,
                anchor.spki,
                anchor.name_constraints,
            )
        }));
        let config = ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(config));
        let server_name = ServerName::try_from(host).map_err(|err| {
            Error::from_string(
                ErrorKind::CertError,
                format!("Invalid server name {host}: {err:?}"),
            )
        })?;
        let tls_stream = connector.connect(server_name, tcp_stream).await?;
        Ok(Self::Tls(Box::new(tls_stream)))
    }

    /// Read some bytes, appending to `buf`. 0 means the remote broker
    /// closed the connection.
    ///
    /// # Errors
    ///
    /// Returns error if the socket fails.
    pub async fn read_buf(&mut self, buf: &mut Vec<u8>) -> Result<usize, Error> {
        match self {
            Self::Tcp(tcp_stream) => Ok(tcp_stream.read_buf(buf).await?),
            Self::Tls(tls_stream) => Ok(tls_stream.read_buf(buf).await?),
        }
    }

    /// Write the whole buffer.
    ///
    /// # Errors
    ///
    /// Returns error if the socket fails.
    pub async fn write(&mut self, buf: &[u8]) -> Result<(), Error> {
        match self {
            Self::Tcp(tcp_stream) => Ok(tcp_stream.write_all(buf).await?),
            Self::Tls(tls_stream) => Ok(tls_stream.write_all(buf).await?),
        }
    }
}
