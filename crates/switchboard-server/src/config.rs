//! Server configuration from the command line.

use std::path::PathBuf;

use anyhow::{bail, Result};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen URL, `ws://host[:port]` or `wss://host[:port]`.
    pub listen_url: String,
    /// CA bundle; when present on disk it enables client verification.
    pub ca_path: PathBuf,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_url: "ws://localhost:8000".to_string(),
            ca_path: PathBuf::from("ca.pem"),
            cert_path: PathBuf::from("cert.pem"),
            key_path: PathBuf::from("key.pem"),
        }
    }
}

/// Where to bind and whether to wrap the listener in TLS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub addr: String,
    pub tls: bool,
}

impl ServerConfig {
    /// Parse the listen URL into a bind address and a TLS flag.
    ///
    /// The port defaults to 80 or 443 by scheme; any path suffix is ignored.
    pub fn endpoint(&self) -> Result<Endpoint> {
        let (tls, rest) = if let Some(rest) = self.listen_url.strip_prefix("ws://") {
            (false, rest)
        } else if let Some(rest) = self.listen_url.strip_prefix("wss://") {
            (true, rest)
        } else {
            bail!(
                "listen URL '{}' must start with ws:// or wss://",
                self.listen_url
            );
        };
        let authority = rest.split('/').next().unwrap_or_default();
        if authority.is_empty() {
            bail!("listen URL '{}' has no host", self.listen_url);
        }
        let addr = if authority.contains(':') {
            authority.to_string()
        } else if tls {
            format!("{authority}:443")
        } else {
            format!("{authority}:80")
        };
        Ok(Endpoint { addr, tls })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(url: &str) -> Result<Endpoint> {
        ServerConfig {
            listen_url: url.to_string(),
            ..ServerConfig::default()
        }
        .endpoint()
    }

    #[test]
    fn parses_plain_listener() {
        assert_eq!(
            endpoint("ws://localhost:8000").unwrap(),
            Endpoint {
                addr: "localhost:8000".to_string(),
                tls: false,
            }
        );
    }

    #[test]
    fn parses_tls_listener() {
        assert_eq!(
            endpoint("wss://0.0.0.0:9443").unwrap(),
            Endpoint {
                addr: "0.0.0.0:9443".to_string(),
                tls: true,
            }
        );
    }

    #[test]
    fn defaults_port_by_scheme() {
        assert_eq!(endpoint("ws://example.net").unwrap().addr, "example.net:80");
        assert_eq!(
            endpoint("wss://example.net").unwrap().addr,
            "example.net:443"
        );
    }

    #[test]
    fn ignores_path_suffix() {
        assert_eq!(
            endpoint("ws://localhost:8000/websocket").unwrap().addr,
            "localhost:8000"
        );
    }

    #[test]
    fn rejects_other_schemes() {
        assert!(endpoint("http://localhost:8000").is_err());
        assert!(endpoint("ws://").is_err());
    }
}
