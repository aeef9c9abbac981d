mod types;

pub use types::*;

use anyhow::{Context, Result};
use hlsforge_common::SiteId;
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./hlsforge.toml",
        "~/.config/hlsforge/config.toml",
        "/etc/hlsforge/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    let mut config = Config::default();
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    Ok(config)
}

/// Secrets and endpoints can come from the environment instead of the file.
pub fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(key) = var("HLSFORGE_MASTER_KEY") {
        config.api.master_key = key;
    }
    if let Some(url) = var("HLSFORGE_API_URL") {
        config.api.base_url = url;
    }
    if let Some(url) = var("HLSFORGE_UPLOAD_URL") {
        config.upload.base_url = url;
    }
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    let c = &config.conversion;
    if c.segment_duration == 0 {
        anyhow::bail!("conversion.segment_duration must be at least 1 second");
    }
    if c.segment_file_prefix.is_empty() || c.segment_file_prefix.contains('/') {
        anyhow::bail!("conversion.segment_file_prefix must be a plain file name prefix");
    }
    if !c.index_file_name.ends_with(".m3u8") {
        anyhow::bail!("conversion.index_file_name must end in .m3u8");
    }
    if c.download_stall_timeout_secs == 0 || c.download_connect_timeout_secs == 0 {
        anyhow::bail!("conversion download timeouts must be at least 1 second");
    }

    if config.upload.concurrency == 0 {
        anyhow::bail!("upload.concurrency cannot be 0");
    }

    let mut hosts = std::collections::HashSet::new();
    for site in &config.sites {
        if !hosts.insert(site.host.to_ascii_lowercase()) {
            anyhow::bail!("Site '{}' is configured more than once", site.host);
        }
        SiteId::parse(&site.id).with_context(|| format!("Site '{}' has an invalid id", site.host))?;
        if site.sources.is_empty() {
            tracing::warn!("Site '{}' has no sources", site.host);
        }
    }

    if !config.sites.is_empty() && config.api.base_url.is_empty() {
        tracing::warn!("Sites are configured but api.base_url is empty");
    }

    Ok(())
}
