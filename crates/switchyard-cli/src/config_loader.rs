use anyhow::Context;
use std::path::{Path, PathBuf};
use switchyard_core::Config;

/// Default configuration written by `--init`.
pub const DEFAULT_CONFIG: &str = include_str!("../config.json");

fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

fn is_toml(source: &str) -> bool {
    let path = source.split(['?', '#']).next().unwrap_or(source);
    path.to_ascii_lowercase().ends_with(".toml")
}

/// Parse a configuration document; `.toml` sources are TOML, anything else
/// is JSON.
pub fn parse_config(source: &str, text: &str) -> anyhow::Result<Config> {
    let config = if is_toml(source) {
        Config::from_toml_str(text)
    } else {
        Config::from_json_str(text)
    };
    config.with_context(|| format!("Invalid configuration in '{source}'"))
}

/// Load the configuration from a file path or an `http(s)://` URL.
pub async fn load_config(source: &str, insecure: bool) -> anyhow::Result<Config> {
    let text = if is_remote(source) {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(insecure)
            .build()?;
        client
            .get(source)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .with_context(|| format!("Failed to fetch config from '{source}'"))?
            .text()
            .await?
    } else {
        tokio::fs::read_to_string(source)
            .await
            .with_context(|| format!("Failed to read config file '{source}'"))?
    };
    parse_config(source, &text)
}

/// Directory that holds the verbose stdio log: next to a local config file,
/// or the working directory for a remote one.
pub fn log_dir(source: &str) -> PathBuf {
    if is_remote(source) {
        return std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    }
    let path = Path::new(source);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    absolute
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Result of `--init`.
#[derive(Debug, PartialEq, Eq)]
pub enum InitOutcome {
    Created(PathBuf),
    AlreadyExists(PathBuf),
}

/// Write the bundled default configuration to `<dest>/config.json`, where
/// `dest` defaults to `~/switchyard`. An existing file is left alone.
pub fn init_config(dest: Option<&Path>) -> anyhow::Result<InitOutcome> {
    let dir = match dest {
        Some(dir) => dir.to_path_buf(),
        None => dirs::home_dir()
            .context("Cannot determine the home directory; pass --init-dest")?
            .join("switchyard"),
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create '{}'", dir.display()))?;

    let target = dir.join("config.json");
    if target.exists() {
        return Ok(InitOutcome::AlreadyExists(target));
    }
    std::fs::write(&target, DEFAULT_CONFIG)
        .with_context(|| format!("Failed to write '{}'", target.display()))?;
    Ok(InitOutcome::Created(target))
}
