//! Context helpers for IO errors raised while connecting.
//!
//! The well-known socket failures map onto their own `NetError` codes so a
//! caller can tell a refused connection from a reset one. Anything else keeps
//! the host and port in the message.

use crate::base::neterror::NetError;
use std::io;

pub trait IoResultExt<T> {
    /// Maps a connect error, keeping `host:port` for the generic case.
    ///
    /// ```ignore
    /// let stream = TcpStream::connect(addr).await.connection_context("example.com", 443)?;
    /// ```
    fn connection_context(self, host: &str, port: u16) -> Result<T, NetError>;

    fn dns_context(self, domain: &str) -> Result<T, NetError>;
}

impl<T> IoResultExt<T> for Result<T, io::Error> {
    fn connection_context(self, host: &str, port: u16) -> Result<T, NetError> {
        self.map_err(|e| match e.kind() {
            io::ErrorKind::ConnectionRefused => {
                tracing::debug!(host, port, "connection refused");
                NetError::ConnectionRefused
            }
            io::ErrorKind::ConnectionReset => NetError::ConnectionReset,
            io::ErrorKind::ConnectionAborted => NetError::ConnectionAborted,
            io::ErrorKind::TimedOut => NetError::ConnectionTimedOut,
            _ => NetError::connection_failed_to(host, port, e),
        })
    }

    fn dns_context(self, domain: &str) -> Result<T, NetError> {
        self.map_err(|e| NetError::dns_failed(domain, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error, ErrorKind};

    fn connect_error(kind: ErrorKind) -> NetError {
        let result: Result<(), io::Error> = Err(Error::new(kind, "boom"));
        result.connection_context("api.example", 8080).unwrap_err()
    }

    #[test]
    fn test_known_kinds_get_their_own_code() {
        assert_eq!(connect_error(ErrorKind::ConnectionRefused), NetError::ConnectionRefused);
        assert_eq!(connect_error(ErrorKind::ConnectionReset), NetError::ConnectionReset);
        assert_eq!(connect_error(ErrorKind::TimedOut), NetError::ConnectionTimedOut);
    }

    #[test]
    fn test_other_kinds_keep_host_and_port() {
        match connect_error(ErrorKind::AddrNotAvailable) {
            NetError::ConnectionFailedTo { host, port, .. } => {
                assert_eq!(host, "api.example");
                assert_eq!(port, 8080);
            }
            other => panic!("expected ConnectionFailedTo, got {:?}", other),
        }
    }

    #[test]
    fn test_dns_context() {
        let result: Result<(), io::Error> = Err(Error::new(ErrorKind::NotFound, "no such host"));
        match result.dns_context("unknown.example").unwrap_err() {
            NetError::NameNotResolvedFor { domain, .. } => assert_eq!(domain, "unknown.example"),
            other => panic!("expected NameNotResolvedFor, got {:?}", other),
        }
    }
}
