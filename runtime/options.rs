/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Server options, loadable from a TOML file.
//!
//! Every field has a default, so a file only needs the keys it overrides:
//!
//! ```toml
//! addr = "0.0.0.0:9090"
//! root = "/debug/statscope"
//! interval_ms = 500
//! ```

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use statscope_core::MAX_BUCKETS;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerOptions {
    /// Listen address of the demo binary.
    pub addr: SocketAddr,
    /// Path prefix; the streaming endpoint is `<root>/ws`.
    pub root: String,
    /// Default send period of a connection.
    pub interval_ms: u64,
    /// Upper bound on heatmap rows after downsampling.
    pub max_buckets: usize,
    /// A write blocked longer than this closes the connection.
    pub write_timeout_ms: u64,
    /// Wake-up period of the scheduling latency probe.
    pub sched_probe_period_ms: u64,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 8080)),
            root: "/debug/statscope".to_string(),
            interval_ms: 1000,
            max_buckets: MAX_BUCKETS,
            write_timeout_ms: 5000,
            sched_probe_period_ms: 10,
        }
    }
}

#[derive(Debug)]
pub enum OptionsError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for OptionsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read { path, source } => {
                write!(f, "cannot read options file {}: {source}", path.display())
            }
            Self::Parse { path, source } => {
                write!(f, "invalid options file {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for OptionsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Read { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
        }
    }
}

impl ServerOptions {
    pub fn load(path: &Path) -> Result<Self, OptionsError> {
        let text = std::fs::read_to_string(path).map_err(|source| OptionsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let options = toml::from_str(&text).map_err(|source| OptionsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        log::debug!("options: loaded {}", path.display());
        Ok(options)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn sched_probe_period(&self) -> Duration {
        Duration::from_millis(self.sched_probe_period_ms)
    }
}
