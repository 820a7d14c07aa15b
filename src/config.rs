//! Server configuration
//!
//! Defaults overridden by `BRIG_*` environment variables, which in turn are
//! overridden by CLI flags in `main`.

use std::env;

/// Default LFS threshold: payloads of 1 MiB and above move out of band
pub const DEFAULT_LFS_THRESHOLD: u64 = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server binds to
    pub bind_addr: String,
    /// Public base URL clients reach this server at (used in `.lfsconfig`
    /// and LFS verify hrefs)
    pub public_url: String,
    /// Backend REST endpoint
    pub backend_endpoint: String,
    pub backend_access_key: String,
    pub backend_secret_key: String,
    /// Storage gateway endpoint issuing presigned payload URLs
    pub storage_endpoint: String,
    /// Blob size at which payloads are replaced by LFS pointers
    pub lfs_threshold_bytes: u64,
    /// Accept pushes that discard history
    pub allow_force_push: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: "0.0.0.0:48888".to_string(),
            public_url: "http://localhost:48888".to_string(),
            backend_endpoint: "http://localhost:8000".to_string(),
            backend_access_key: "access-key".to_string(),
            backend_secret_key: "secret-key".to_string(),
            storage_endpoint: "http://localhost:9000".to_string(),
            lfs_threshold_bytes: DEFAULT_LFS_THRESHOLD,
            allow_force_push: false,
        }
    }
}

impl Config {
    /// Defaults with `BRIG_*` environment overrides applied
    pub fn from_env() -> Self {
        let mut config = Config::default();

        override_string(&mut config.bind_addr, "BRIG_BIND_ADDR");
        override_string(&mut config.public_url, "BRIG_PUBLIC_URL");
        override_string(&mut config.backend_endpoint, "BRIG_BACKEND_ENDPOINT");
        override_string(&mut config.backend_access_key, "BRIG_BACKEND_ACCESS_KEY");
        override_string(&mut config.backend_secret_key, "BRIG_BACKEND_SECRET_KEY");
        override_string(&mut config.storage_endpoint, "BRIG_STORAGE_ENDPOINT");

        if let Some(value) = env::var("BRIG_LFS_THRESHOLD_BYTES").ok().as_deref() {
            if let Some(parsed) = parse_size(value) {
                config.lfs_threshold_bytes = parsed;
            } else {
                tracing::warn!(value, "ignoring unparsable BRIG_LFS_THRESHOLD_BYTES");
            }
        }
        if let Ok(value) = env::var("BRIG_ALLOW_FORCE_PUSH") {
            config.allow_force_push = parse_bool(&value);
        }

        config
    }
}

fn override_string(target: &mut String, key: &str) {
    if let Ok(value) = env::var(key)
        && !value.is_empty()
    {
        *target = value;
    }
}

fn parse_size(value: &str) -> Option<u64> {
    value.trim().parse().ok()
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
