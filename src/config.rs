//! IMAP connection configuration

use crate::error::{Error, Result};
use std::env;

/// How the TLS layer is established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsMode {
    /// TLS from the first byte (IMAPS, port 993).
    #[default]
    Implicit,
    /// Plain TCP upgraded with the STARTTLS command (port 143).
    StartTls,
}

impl TlsMode {
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::Implicit => 993,
            Self::StartTls => 143,
        }
    }
}

/// IMAP connection configuration
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub tls: TlsMode,
    /// Skip certificate verification (self-signed bridges, test servers).
    pub accept_invalid_certs: bool,
}

impl ImapConfig {
    /// Configuration for an implicit-TLS server on the default port.
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: TlsMode::Implicit.default_port(),
            username: username.into(),
            password: password.into(),
            tls: TlsMode::Implicit,
            accept_invalid_certs: false,
        }
    }

    /// Load IMAP configuration from environment variables
    ///
    /// Reads from `.env` file if present. Required variables:
    /// - `IMAP_HOST`
    /// - `IMAP_USERNAME`
    /// - `IMAP_PASSWORD`
    ///
    /// Optional (with defaults):
    /// - `IMAP_TLS` (`implicit` or `starttls`, default: `implicit`)
    /// - `IMAP_PORT` (default: `993`, or `143` with STARTTLS)
    /// - `IMAP_ACCEPT_INVALID_CERTS` (default: `false`)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let tls = match env::var("IMAP_TLS") {
            Ok(mode) => parse_tls_mode(&mode)?,
            Err(_) => TlsMode::default(),
        };

        let port = match env::var("IMAP_PORT") {
            Ok(port) => port
                .parse()
                .map_err(|e| Error::Config(format!("Invalid IMAP_PORT: {e}")))?,
            Err(_) => tls.default_port(),
        };

        let accept_invalid_certs = match env::var("IMAP_ACCEPT_INVALID_CERTS") {
            Ok(flag) => parse_bool(&flag)
                .ok_or_else(|| Error::Config(format!("Invalid IMAP_ACCEPT_INVALID_CERTS: {flag}")))?,
            Err(_) => false,
        };

        Ok(Self {
            host: env::var("IMAP_HOST").map_err(|_| Error::Config("IMAP_HOST not set".into()))?,
            port,
            username: env::var("IMAP_USERNAME")
                .map_err(|_| Error::Config("IMAP_USERNAME not set".into()))?,
            password: env::var("IMAP_PASSWORD")
                .map_err(|_| Error::Config("IMAP_PASSWORD not set".into()))?,
            tls,
            accept_invalid_certs,
        })
    }
}

fn parse_tls_mode(s: &str) -> Result<TlsMode> {
    match s.trim().to_ascii_lowercase().as_str() {
        "implicit" | "ssl" | "tls" => Ok(TlsMode::Implicit),
        "starttls" => Ok(TlsMode::StartTls),
        other => Err(Error::Config(format!("Invalid IMAP_TLS: {other}"))),
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
