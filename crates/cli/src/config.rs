//! Client configuration loading and transport construction.

use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use frostvault_core::ClientConfig;
use frostvault_signer::{Credentials, SigV4Signer};
use frostvault_transport::http::SERVICE;
use frostvault_transport::{HttpTransport, endpoint_for_region};
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "FROSTVAULT_CONFIG";
const ENV_PREFIX: &str = "FROSTVAULT_";

/// Resolve the config file: explicit path, then `FROSTVAULT_CONFIG`, then the XDG location.
pub fn config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return Ok(PathBuf::from(path));
    }

    let base = match std::env::var_os("XDG_CONFIG_HOME") {
        Some(path) => PathBuf::from(path),
        None => {
            let home = std::env::var_os("HOME")
                .ok_or_else(|| anyhow::anyhow!("HOME not set; set {CONFIG_ENV}"))?;
            PathBuf::from(home).join(".config")
        }
    };

    Ok(base.join("frostvault").join("config.toml"))
}

/// Merge the TOML file (if any) with `FROSTVAULT_*` environment variables.
pub fn load_client_config(path: &Path) -> Result<ClientConfig> {
    let mut figment = Figment::new();

    if path.exists() {
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: ClientConfig = match figment.extract() {
        Ok(config) => config,
        Err(_) if !path.exists() => ClientConfig::default(),
        Err(err) => {
            return Err(anyhow::anyhow!(err).context(format!(
                "failed to load client configuration from {}",
                path.display()
            )));
        }
    };

    config
        .validate()
        .map_err(|message| anyhow::anyhow!("invalid client configuration: {message}"))?;
    Ok(config)
}

/// Credentials from the config file, falling back to the standard AWS variables.
pub fn credentials(config: &ClientConfig) -> Result<Credentials> {
    match (&config.access_key_id, &config.secret_access_key) {
        (Some(access_key_id), Some(secret_access_key)) => {
            let credentials = Credentials::new(access_key_id, secret_access_key);
            Ok(match &config.session_token {
                Some(token) => credentials.with_session_token(token),
                None => credentials,
            })
        }
        _ => Credentials::from_env().context("no credentials in config or environment"),
    }
}

pub fn endpoint(config: &ClientConfig) -> String {
    config
        .endpoint
        .clone()
        .unwrap_or_else(|| endpoint_for_region(&config.region))
}

pub fn build_transport(config: &ClientConfig) -> Result<HttpTransport> {
    let signer = SigV4Signer::new(credentials(config)?, config.region.clone(), SERVICE);
    let endpoint = endpoint(config);
    HttpTransport::new(&endpoint, signer, config.request_timeout())
        .with_context(|| format!("failed to create transport for {endpoint}"))
}

/// The config as TOML with secrets masked.
pub fn render_redacted(config: &ClientConfig) -> Result<String> {
    let mut shown = config.clone();
    shown.secret_access_key = shown.secret_access_key.map(|_| "<redacted>".to_string());
    shown.session_token = shown.session_token.map(|_| "<redacted>".to_string());
    toml::to_string_pretty(&shown).context("failed to render configuration")
}
