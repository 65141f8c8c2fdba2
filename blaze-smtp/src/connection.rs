//! Implicit TLS for inbound connections.

use std::{fs::File, io::BufReader, path::Path, sync::Arc};

use blaze_common::tracing;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::{
    TlsAcceptor,
    rustls::{
        ServerConfig, ServerConnection,
        pki_types::{CertificateDer, PrivateKeyDer},
        version::{TLS12, TLS13},
    },
    server::TlsStream,
};

use crate::{
    config::TlsContext,
    error::{TlsError, TlsResult},
};

/// Protocol version and cipher suite negotiated for one connection.
#[derive(Debug)]
pub struct TlsInfo {
    pub protocol: String,
    pub cipher: String,
}

impl TlsInfo {
    fn of(conn: &ServerConnection) -> TlsResult<Self> {
        let version = conn
            .protocol_version()
            .ok_or(TlsError::ProtocolInfoMissing("protocol version"))?;
        let suite = conn
            .negotiated_cipher_suite()
            .ok_or(TlsError::ProtocolInfoMissing("cipher suite"))?;

        Ok(Self {
            protocol: version.as_str().unwrap_or_default().to_string(),
            cipher: suite.suite().as_str().unwrap_or_default().to_string(),
        })
    }
}

fn load_certs(path: &Path) -> TlsResult<Vec<CertificateDer<'static>>> {
    let file = File::open(path).map_err(|source| TlsError::CertificateLoad {
        path: path.display().to_string(),
        source,
    })?;

    rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::CertificateLoad {
            path: path.display().to_string(),
            source,
        })
}

fn load_key(path: &Path) -> TlsResult<PrivateKeyDer<'static>> {
    let key_error = |reason: String| TlsError::KeyLoad {
        path: path.display().to_string(),
        reason,
    };

    let mut reader = BufReader::new(File::open(path).map_err(|e| key_error(e.to_string()))?);

    match rustls_pemfile::read_one(&mut reader).map_err(|e| key_error(e.to_string()))? {
        Some(rustls_pemfile::Item::Pkcs1Key(key)) => Ok(PrivateKeyDer::Pkcs1(key)),
        Some(rustls_pemfile::Item::Pkcs8Key(key)) => Ok(PrivateKeyDer::Pkcs8(key)),
        Some(rustls_pemfile::Item::Sec1Key(key)) => Ok(PrivateKeyDer::Sec1(key)),
        _ => Err(key_error(
            "Unable to determine key file format (expected PKCS1, PKCS8, or SEC1)".to_string(),
        )),
    }
}

/// Build an acceptor from the configured certificate and key, offering
/// TLS 1.2 and newer.
///
/// # Errors
///
/// Fails if either file is missing or unreadable, or rustls rejects the pair.
pub fn acceptor(context: &TlsContext) -> TlsResult<TlsAcceptor> {
    let certs = load_certs(&context.certificate)?;
    let key = load_key(&context.key)?;

    let config = ServerConfig::builder_with_protocol_versions(&[&TLS13, &TLS12])
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Complete the server side of the handshake on a freshly accepted stream.
///
/// # Errors
///
/// Fails if the handshake does.
pub async fn accept<Stream: AsyncRead + AsyncWrite + Unpin>(
    acceptor: &TlsAcceptor,
    stream: Stream,
) -> TlsResult<TlsStream<Stream>> {
    let stream = acceptor.accept(stream).await?;
    let info = TlsInfo::of(stream.get_ref().1)?;
    tracing::debug!(protocol = %info.protocol, cipher = %info.cipher, "TLS established");

    Ok(stream)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn missing_certificate_is_reported() {
        let context = TlsContext {
            certificate: "/nonexistent/cert.pem".into(),
            key: "/nonexistent/key.pem".into(),
        };

        let Err(err) = acceptor(&context) else {
            panic!("acceptor built without a certificate");
        };
        assert!(matches!(err, TlsError::CertificateLoad { .. }));
    }

    #[test]
    fn unrecognised_key_is_reported() {
        let mut key = tempfile::NamedTempFile::new().unwrap();
        writeln!(key, "not a pem file").unwrap();

        let err = load_key(key.path()).unwrap_err();
        assert!(matches!(err, TlsError::KeyLoad { .. }));
    }
}
