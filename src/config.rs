//! Configuration (§6): one YAML document shared by both binaries. Each
//! binary only reads the sections relevant to its role (client reads
//! `client`, relay reads `server`; both read `common`).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_pool_size() -> usize {
    10
}

fn default_env() -> String {
    "dev".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommonConfig {
    pub env: String,
    #[serde(rename = "logFile")]
    pub log_file: Option<String>,
}

impl Default for CommonConfig {
    fn default() -> Self {
        CommonConfig {
            env: default_env(),
            log_file: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    #[serde(rename = "tcpAddr")]
    pub tcp_addr: Option<String>,
    #[serde(rename = "grpcAddr")]
    pub grpc_addr: Option<String>,
    #[serde(rename = "privateKey")]
    pub private_key: String,
    #[serde(rename = "crtFile")]
    pub crt_file: String,
    #[serde(rename = "caFile")]
    pub ca_file: Option<String>,
}

/// `{dns: "host[:53]"}` or `{doT: "host"}` (§3 ResolverSpec).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResolverSpec {
    #[serde(rename = "dns")]
    Plain(String),
    #[serde(rename = "doT")]
    DnsOverTls(String),
}

/// `{name, net, addr}` — a RelayDescriptor's wire form. `transport` is
/// inferred from which listener address is non-empty on the relay that
/// owns `addr`; here it is named explicitly since the client can't probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEntry {
    pub name: String,
    pub net: String,
    pub addr: String,
    #[serde(default)]
    pub transport: TransportKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    #[default]
    Raw,
    Stream,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    #[serde(rename = "httpAddr")]
    pub http_addr: String,
    #[serde(rename = "socksAddr")]
    pub socks_addr: String,
    #[serde(rename = "privateKey")]
    pub private_key: String,
    #[serde(rename = "crtFile")]
    pub crt_file: String,
    #[serde(rename = "caFile")]
    pub ca_file: Option<String>,
    #[serde(rename = "poolSize", default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default)]
    pub insecure: bool,
    #[serde(default)]
    pub resolvers: Vec<ResolverSpec>,
    #[serde(default)]
    pub servers: Vec<ServerEntry>,
    #[serde(default)]
    pub rules: Vec<String>,
    #[serde(rename = "geoipDatabase")]
    pub geoip_database: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            http_addr: String::new(),
            socks_addr: String::new(),
            private_key: String::new(),
            crt_file: String::new(),
            ca_file: None,
            pool_size: default_pool_size(),
            insecure: false,
            resolvers: Vec::new(),
            servers: Vec::new(),
            rules: Vec::new(),
            geoip_database: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub common: CommonConfig,
    pub server: ServerConfig,
    pub client: ClientConfig,
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = tokio::fs::read_to_string(path.as_ref())
            .await
            .map_err(|e| Error::config(format!("reading {}: {}", path.as_ref().display(), e)))?;
        let config: Config = serde_yaml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the sections needed by whichever binary calls it. A
    /// binary that has nothing configured in its section (e.g. a relay
    /// run with no `server.tcpAddr`/`grpcAddr` at all) fails fast rather
    /// than starting a process that accepts nothing.
    pub fn validate(&self) -> Result<()> {
        if self.server.tcp_addr.is_none()
            && self.server.grpc_addr.is_none()
            && self.client.http_addr.is_empty()
            && self.client.socks_addr.is_empty()
        {
            return Err(Error::config(
                "neither server nor client section configures a listener",
            ));
        }
        Ok(())
    }

    pub fn validate_relay(&self) -> Result<()> {
        if self.server.tcp_addr.is_none() && self.server.grpc_addr.is_none() {
            return Err(Error::config(
                "server.tcpAddr or server.grpcAddr must be set (at least one relay listener)",
            ));
        }
        if self.server.private_key.is_empty() || self.server.crt_file.is_empty() {
            return Err(Error::config("server.privateKey and server.crtFile are required"));
        }
        Ok(())
    }

    pub fn validate_client(&self) -> Result<()> {
        if self.client.http_addr.is_empty() && self.client.socks_addr.is_empty() {
            return Err(Error::config(
                "client.httpAddr or client.socksAddr must be set",
            ));
        }
        if self.client.private_key.is_empty() || self.client.crt_file.is_empty() {
            return Err(Error::config("client.privateKey and client.crtFile are required"));
        }
        for server in &self.client.servers {
            if server.name == "reject" || server.name == "direct" {
                return Err(Error::config(format!(
                    "server name '{}' is reserved for the synthetic relay",
                    server.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_client_config() {
        let yaml = r#"
common:
  env: dev
client:
  httpAddr: "127.0.0.1:8080"
  socksAddr: "127.0.0.1:1080"
  privateKey: client.key
  crtFile: client.crt
  poolSize: 5
  resolvers:
    - dns: "1.1.1.1"
    - doT: "dns.google"
  servers:
    - name: relay1
      net: tcp
      addr: "relay.example.com:9000"
      transport: raw
  rules:
    - "host-suffix:ad.com, reject"
    - "match-all, forward:relay1"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.client.pool_size, 5);
        assert_eq!(config.client.servers.len(), 1);
        assert_eq!(config.client.rules.len(), 2);
        config.validate_client().unwrap();
    }

    #[test]
    fn default_pool_size_is_ten() {
        let config = ClientConfig::default();
        assert_eq!(config.pool_size, 10);
    }

    #[test]
    fn rejects_reserved_server_name() {
        let mut config = Config::default();
        config.client.http_addr = "127.0.0.1:1".into();
        config.client.private_key = "k".into();
        config.client.crt_file = "c".into();
        config.client.servers.push(ServerEntry {
            name: "direct".into(),
            net: "tcp".into(),
            addr: "x:1".into(),
            transport: TransportKind::Raw,
        });
        assert!(config.validate_client().is_err());
    }

    #[test]
    fn relay_requires_at_least_one_listener() {
        let config = Config::default();
        assert!(config.validate_relay().is_err());
    }
}
