//! Container configuration.
//!
//! A [`ContainerConfig`] is a snapshot taken when the container is created.
//! It can be built in code or loaded from TOML:
//!
//! ```toml
//! ip = "127.0.0.1"
//! port = 8443
//! enable_ssl = true
//! cert_file = "certs/server.crt"
//! key_file = "certs/server.key"
//! read_timeout_ms = 5000
//! write_timeout_ms = 30000
//! ```
//!
//! Every field has a default. Timeouts of `0` mean "no timeout".

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContainerConfig {
    /// Bind address; empty means all interfaces.
    pub ip: String,
    pub port: u16,
    pub enable_ssl: bool,
    pub key_file: Option<PathBuf>,
    pub cert_file: Option<PathBuf>,
    /// Upper bound for reading a request's headers.
    pub read_timeout_ms: u64,
    /// Upper bound for producing a response.
    pub write_timeout_ms: u64,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            ip: "0.0.0.0".to_owned(),
            port: 8080,
            enable_ssl: false,
            key_file: None,
            cert_file: None,
            read_timeout_ms: 0,
            write_timeout_ms: 0,
        }
    }
}

impl ContainerConfig {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self { ip: ip.into(), port, ..Self::default() }
    }

    /// Enables TLS with the given PEM files.
    pub fn with_tls(mut self, cert_file: impl Into<PathBuf>, key_file: impl Into<PathBuf>) -> Self {
        self.enable_ssl = true;
        self.cert_file = Some(cert_file.into());
        self.key_file = Some(key_file.into());
        self
    }

    pub fn with_timeouts(mut self, read: Duration, write: Duration) -> Self {
        self.read_timeout_ms = read.as_millis().try_into().unwrap_or(u64::MAX);
        self.write_timeout_ms = write.as_millis().try_into().unwrap_or(u64::MAX);
        self
    }

    /// `ip:port` as configured.
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, Error> {
        let ip = if self.ip.is_empty() {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        } else {
            self.ip
                .parse()
                .map_err(|e| Error::Config(format!("ip `{}`: {e}", self.ip)))?
        };
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_ms > 0).then(|| Duration::from_millis(self.read_timeout_ms))
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        (self.write_timeout_ms > 0).then(|| Duration::from_millis(self.write_timeout_ms))
    }

    /// Semantic checks. All problems are reported at once.
    pub fn validate(&self) -> Result<(), Error> {
        let mut problems = Vec::new();

        if !self.ip.is_empty() && self.ip.parse::<IpAddr>().is_err() {
            problems.push(format!("ip `{}` is not an IP address", self.ip));
        }
        if self.enable_ssl {
            match &self.cert_file {
                None => problems.push("enable_ssl requires cert_file".to_owned()),
                Some(path) if !path.exists() => {
                    problems.push(format!("cert_file {} does not exist", path.display()))
                }
                Some(_) => {}
            }
            match &self.key_file {
                None => problems.push("enable_ssl requires key_file".to_owned()),
                Some(path) if !path.exists() => {
                    problems.push(format!("key_file {} does not exist", path.display()))
                }
                Some(_) => {}
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(problems.join(", ")))
        }
    }

    /// Parses TOML without checking the result.
    pub fn from_toml_str(source: &str) -> Result<Self, Error> {
        toml::from_str(source).map_err(|e| Error::Config(e.to_string()))
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        let config = Self::from_toml_str(&source)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config = ContainerConfig::from_toml_str("port = 9000\nwrite_timeout_ms = 250").unwrap();
        assert_eq!(config.ip, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.read_timeout(), None);
        assert_eq!(config.write_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(matches!(ContainerConfig::from_toml_str("prot = 1"), Err(Error::Config(_))));
    }

    #[test]
    fn validation_reports_every_problem() {
        let config = ContainerConfig { ip: "localhost:1".into(), enable_ssl: true, ..Default::default() };
        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("ip `localhost:1`"));
        assert!(message.contains("cert_file"));
        assert!(message.contains("key_file"));
    }

    #[test]
    fn empty_ip_binds_every_interface() {
        let config = ContainerConfig::new("", 7000);
        assert_eq!(config.socket_addr().unwrap(), "0.0.0.0:7000".parse().unwrap());
        assert_eq!(config.address(), ":7000");
    }
}
