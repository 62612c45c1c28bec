//! Process configuration.
//!
//! Every setting has a default; environment variables override:
//!
//! | Variable              | Default        |
//! |-----------------------|----------------|
//! | `BEE_ADDR`            | `0.0.0.0:3000` |
//! | `BEE_MULTIPART_LIMIT` | `5242880`      |
//! | `BEE_BODY_LIMIT`      | `10485760`     |
//!
//! The body limit caps every request body as it is read off the connection,
//! so it may not be smaller than the multipart limit.

use std::env;
use std::net::{Ipv4Addr, SocketAddr};

use serde::Deserialize;

use crate::error::Error;
use crate::params::{DEFAULT_MULTIPART_LIMIT, ParamParser};

const ENV_ADDR: &str = "BEE_ADDR";
const ENV_MULTIPART_LIMIT: &str = "BEE_MULTIPART_LIMIT";
const ENV_BODY_LIMIT: &str = "BEE_BODY_LIMIT";

/// Largest request body read off the connection (10 MiB).
pub const DEFAULT_BODY_LIMIT: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Socket address the server listens on.
    pub addr: SocketAddr,
    /// Upper bound in bytes for a `multipart/form-data` body.
    pub multipart_limit: usize,
    /// Upper bound in bytes for any request body.
    pub body_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 3000)),
            multipart_limit: DEFAULT_MULTIPART_LIMIT,
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }
}

impl Config {
    /// Defaults overridden by `BEE_*` environment variables. A variable that
    /// is set but unparsable is an error rather than silently ignored.
    pub fn from_env() -> Result<Self, Error> {
        let mut config = Self::default();

        if let Some(raw) = var(ENV_ADDR) {
            config.addr = raw.parse().map_err(|e| Error::Config {
                key: ENV_ADDR,
                message: format!("`{raw}`: {e}"),
            })?;
        }
        if let Some(raw) = var(ENV_MULTIPART_LIMIT) {
            config.multipart_limit = raw.parse().map_err(|e| Error::Config {
                key: ENV_MULTIPART_LIMIT,
                message: format!("`{raw}`: {e}"),
            })?;
        }
        if let Some(raw) = var(ENV_BODY_LIMIT) {
            config.body_limit = raw.parse().map_err(|e| Error::Config {
                key: ENV_BODY_LIMIT,
                message: format!("`{raw}`: {e}"),
            })?;
        }

        if config.body_limit < config.multipart_limit {
            return Err(Error::Config {
                key: ENV_BODY_LIMIT,
                message: format!(
                    "{} is below the multipart limit of {}",
                    config.body_limit, config.multipart_limit
                ),
            });
        }

        Ok(config)
    }

    /// A [`ParamParser`] honouring the configured multipart limit.
    pub fn param_parser(&self) -> ParamParser {
        ParamParser::new().multipart_limit(self.multipart_limit)
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}
