//! Crate-wide error type.
//!
//! The kinds here are exactly the ones named for error handling: each
//! component raises the kind that matches its failure mode, and the
//! propagation policy (per-connection vs. fatal-at-startup) lives with the
//! callers, not here.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("listen error: {0}")]
    Listen(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("resolve error: {0}")]
    Resolve(String),

    #[error("rule error: {0}")]
    Rule(String),

    #[error("dial error: {0}")]
    Dial(String),

    #[error("pool timeout")]
    PoolTimeout,

    #[error("pool closed")]
    PoolClosed,

    #[error("canceled")]
    Canceled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub fn tls<S: Into<String>>(msg: S) -> Self {
        Error::Tls(msg.into())
    }

    pub fn listen<S: Into<String>>(msg: S) -> Self {
        Error::Listen(msg.into())
    }

    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Error::Protocol(msg.into())
    }

    pub fn resolve<S: Into<String>>(msg: S) -> Self {
        Error::Resolve(msg.into())
    }

    pub fn rule<S: Into<String>>(msg: S) -> Self {
        Error::Rule(msg.into())
    }

    pub fn dial<S: Into<String>>(msg: S) -> Self {
        Error::Dial(msg.into())
    }

    /// True for errors that should close only the current connection and
    /// never bring down the listener, pool, or sibling connections.
    pub fn is_per_connection(&self) -> bool {
        !matches!(self, Error::Config(_) | Error::Tls(_) | Error::Listen(_))
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::PoolTimeout
    }
}

impl From<rustls::Error> for Error {
    fn from(e: rustls::Error) -> Self {
        Error::Tls(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_constructor() {
        let e = Error::config("bad field");
        assert!(matches!(e, Error::Config(_)));
    }

    #[test]
    fn display_matches_kind() {
        let e = Error::protocol("oversize frame");
        assert_eq!(e.to_string(), "protocol error: oversize frame");
    }

    #[test]
    fn pool_errors_are_per_connection() {
        assert!(Error::PoolTimeout.is_per_connection());
        assert!(Error::PoolClosed.is_per_connection());
        assert!(!Error::Listen("bind failed".into()).is_per_connection());
    }
}
