use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use crate::socket::client::SocketType;
use boring::ssl::{SslConnector, SslMethod, SslVersion};
use tokio::net::TcpStream;
use url::Url;

/// ALPN list: HTTP/1.1 only, the dispatcher speaks nothing else.
const ALPN_HTTP11: &[u8] = b"\x08http/1.1";

/// Resolves, connects and, for `https`, runs the TLS handshake.
pub struct ConnectJob;

impl ConnectJob {
    pub async fn connect(url: &Url) -> Result<SocketType, NetError> {
        let host = url.host_str().ok_or(NetError::InvalidUrl)?;
        let port = url.port_or_known_default().ok_or(NetError::InvalidUrl)?;
        // IPv6 literals come bracketed from the URL.
        let dns_host = host.trim_start_matches('[').trim_end_matches(']');

        let addrs: Vec<_> = tokio::net::lookup_host((dns_host, port))
            .await
            .dns_context(dns_host)?
            .collect();
        if addrs.is_empty() {
            return Err(NetError::NameNotResolved);
        }

        // First address that answers wins.
        let mut last_error = None;
        let mut stream = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => {
                    tracing::debug!(%addr, error = %e, "connect attempt failed");
                    last_error = Some(e);
                }
            }
        }
        let stream = match (stream, last_error) {
            (Some(stream), _) => stream,
            (None, Some(e)) => return Err(e).connection_context(host, port),
            (None, None) => return Err(NetError::ConnectionFailed),
        };
        let _ = stream.set_nodelay(true);

        if url.scheme() != "https" {
            return Ok(SocketType::Tcp(stream));
        }

        let mut builder =
            SslConnector::builder(SslMethod::tls()).map_err(|_| NetError::SslProtocolError)?;
        builder.set_alpn_protos(ALPN_HTTP11).map_err(|_| NetError::SslProtocolError)?;
        builder
            .set_min_proto_version(Some(SslVersion::TLS1_2))
            .map_err(|_| NetError::SslProtocolError)?;
        let config = builder.build().configure().map_err(|_| NetError::SslProtocolError)?;

        let tls_stream = tokio_boring::connect(config, dns_host, stream).await.map_err(|e| {
            tracing::warn!(host, error = ?e, "TLS handshake failed");
            NetError::SslProtocolError
        })?;
        Ok(SocketType::Ssl(tls_stream))
    }
}
