use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
};

use base64::engine::general_purpose::STANDARD as base64decoder;
use base64::Engine;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not read configuration file: {0}")]
    Read(#[from] std::io::Error),
    #[error("TALLY_CONFIG is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("TALLY_CONFIG is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("Invalid configuration: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("PORT is not a valid port: {0}")]
    Port(#[from] std::num::ParseIntError),
    #[error("Invalid service address {0}")]
    Address(String),
}

#[derive(Clone, Debug, Deserialize)]
pub struct Configuration {
    #[serde(default = "default_service_address")]
    pub service_address: String,
    #[serde(default = "default_service_port")]
    pub service_port: u16,
    /// Polls are kept in memory only when this is not set.
    #[serde(default)]
    pub data_directory: Option<PathBuf>,
    /// Identify voters by the first X-Forwarded-For entry. Only turn this
    /// on behind a proxy that sets the header.
    #[serde(default)]
    pub trust_forwarded_for: bool,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            service_address: default_service_address(),
            service_port: default_service_port(),
            data_directory: None,
            trust_forwarded_for: false,
            max_message_size: default_max_message_size(),
        }
    }
}

impl Configuration {
    pub fn socket_address(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .service_address
            .parse()
            .map_err(|_| ConfigError::Address(self.service_address.clone()))?;
        Ok(SocketAddr::new(ip, self.service_port))
    }
}

fn default_service_address() -> String {
    "127.0.0.1".to_string()
}

fn default_service_port() -> u16 {
    5000
}

fn default_max_message_size() -> usize {
    1024 * 4
}

/// Fetch the configuration. Check a path if one is provided, otherwise
/// look for a base64 encoded blob in the TALLY_CONFIG environment variable,
/// otherwise run with defaults.
///
/// PORT overrides whatever port was configured.
pub fn load_configuration() -> Result<Configuration, ConfigError> {
    let configuration_toml = match std::env::args().nth(1) {
        Some(path) => Some(std::fs::read_to_string(path)?),
        None => match std::env::var("TALLY_CONFIG") {
            Ok(base64_config) => {
                let config_bytes = base64decoder.decode(base64_config)?;
                Some(String::from_utf8(config_bytes)?)
            }
            Err(_) => None,
        },
    };

    let mut config = match configuration_toml {
        Some(toml) => parse_configuration(&toml)?,
        None => {
            info!("No configuration provided, using defaults");
            Configuration::default()
        }
    };

    if let Ok(port) = std::env::var("PORT") {
        config.service_port = port.parse()?;
    }

    Ok(config)
}

pub fn parse_configuration(configuration_toml: &str) -> Result<Configuration, ConfigError> {
    Ok(toml::from_str(configuration_toml)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_configuration_uses_defaults() {
        let config = parse_configuration("").unwrap();
        assert_eq!(config.service_address, "127.0.0.1");
        assert_eq!(config.service_port, 5000);
        assert!(config.data_directory.is_none());
        assert!(!config.trust_forwarded_for);
        assert_eq!(config.max_message_size, 4096);
    }

    #[test]
    fn full_configuration() {
        let config = parse_configuration(
            r#"
            service_address = "0.0.0.0"
            service_port = 8080
            data_directory = "/var/lib/tally"
            trust_forwarded_for = true
            max_message_size = 1024
            "#,
        )
        .unwrap();

        assert_eq!(config.socket_address().unwrap(), "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.data_directory, Some(PathBuf::from("/var/lib/tally")));
        assert!(config.trust_forwarded_for);
        assert_eq!(config.max_message_size, 1024);
    }

    #[test]
    fn bad_address_is_reported() {
        let config = parse_configuration(r#"service_address = "localhost""#).unwrap();
        assert!(matches!(config.socket_address(), Err(ConfigError::Address(_))));
    }

    #[test]
    fn wrong_types_are_rejected() {
        assert!(matches!(
            parse_configuration("service_port = \"eighty\""),
            Err(ConfigError::Toml(_))
        ));
    }
}
