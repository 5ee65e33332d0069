//! Settings captured once from the environment

use crate::compression::CompressionMethod;
use crate::config::{
    ENV_CLOBBER, ENV_COMPRESSION_METHOD, ENV_HEADER_NOVERSION, ENV_ICMP_SPORT_HANDLER,
};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::warn;

static RUNTIME: RwLock<Option<RuntimeConfig>> = parking_lot::const_rwlock(None);

/// Process-wide settings read from the environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RuntimeConfig {
    /// Method used when a writer asks for the default compression
    pub default_compression: CompressionMethod,
    /// Rewrite ICMP type/code stored in the source port
    pub icmp_port_fix: bool,
    /// Allow opening an existing regular file for writing
    pub clobber: bool,
    /// Write 0 as the producer version in new headers
    pub header_no_version: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_compression: CompressionMethod::None,
            icmp_port_fix: true,
            clobber: false,
            header_no_version: false,
        }
    }
}

impl RuntimeConfig {
    /// Build a configuration from the process environment
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(name) = std::env::var(ENV_COMPRESSION_METHOD) {
            if !name.is_empty() {
                match CompressionMethod::from_name(&name) {
                    Some(method) if method.is_available() => {
                        config.default_compression = method
                    }
                    _ => warn!(
                        "Ignoring {}: '{}' is not an available compression method",
                        ENV_COMPRESSION_METHOD, name
                    ),
                }
            }
        }

        if let Ok(handler) = std::env::var(ENV_ICMP_SPORT_HANDLER) {
            config.icmp_port_fix = !handler.eq_ignore_ascii_case("none");
        }

        if let Ok(value) = std::env::var(ENV_CLOBBER) {
            config.clobber = !value.is_empty() && value != "0";
        }

        if let Ok(value) = std::env::var(ENV_HEADER_NOVERSION) {
            config.header_no_version = !value.is_empty();
        }

        config
    }
}

/// Return the captured settings, reading the environment on first use
pub fn runtime() -> RuntimeConfig {
    if let Some(config) = *RUNTIME.read() {
        return config;
    }
    let mut guard = RUNTIME.write();
    *guard.get_or_insert_with(RuntimeConfig::from_env)
}

pub(crate) fn initialize() {
    let mut guard = RUNTIME.write();
    if guard.is_none() {
        *guard = Some(RuntimeConfig::from_env());
    }
}

pub(crate) fn teardown() {
    *RUNTIME.write() = None;
}
