//! Server configuration from the environment
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `MODBUS_PROGRAM_DIR` | `/etc/modbus` | directory scanned for program JSON files |
//! | `LISTEN_ADDR` | `0.0.0.0` | HTTP bind address |
//! | `LISTEN_PORT` | `8080` | HTTP bind port |
//! | `ALLOW_ORIGIN` | `*` | CORS `Access-Control-Allow-Origin` value |

use std::path::PathBuf;

use tracing::warn;

/// Default program directory.
pub const DEFAULT_PROGRAM_DIR: &str = "/etc/modbus";

/// Default HTTP listen address.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0";

/// Default HTTP listen port.
pub const DEFAULT_LISTEN_PORT: u16 = 8080;

/// Runtime configuration for the HTTP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub program_dir: PathBuf,
    pub listen_addr: String,
    pub listen_port: u16,
    pub allow_origin: String,
}

impl ServerConfig {
    /// Build the configuration from environment variables, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let program_dir = env_or("MODBUS_PROGRAM_DIR", DEFAULT_PROGRAM_DIR);
        let listen_addr = env_or("LISTEN_ADDR", DEFAULT_LISTEN_ADDR);
        let allow_origin = env_or("ALLOW_ORIGIN", "*");

        let listen_port = match std::env::var("LISTEN_PORT") {
            Ok(raw) if !raw.is_empty() => raw.parse().unwrap_or_else(|_| {
                warn!(value = %raw, "LISTEN_PORT is not a valid port, using default");
                DEFAULT_LISTEN_PORT
            }),
            _ => DEFAULT_LISTEN_PORT,
        };

        Self {
            program_dir: PathBuf::from(program_dir),
            listen_addr,
            listen_port,
            allow_origin,
        }
    }

    /// `host:port` the HTTP listener binds to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.listen_addr, self.listen_port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            program_dir: PathBuf::from(DEFAULT_PROGRAM_DIR),
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            listen_port: DEFAULT_LISTEN_PORT,
            allow_origin: "*".to_string(),
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.program_dir, PathBuf::from("/etc/modbus"));
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
        assert_eq!(config.allow_origin, "*");
    }
}
