use std::collections::HashSet;
use std::fmt;
use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, anyhow, bail};
use dropwatch_core::EndpointDescriptor;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::endpoint::EndpointConfig;

pub const CONFIG_PATH_ENV: &str = "DROPWATCH_CONFIG_PATH";
pub const CONFIG_JSON_ENV: &str = "DROPWATCH_CONFIG_JSON";

const SEARCH_DIRS: &[&str] = &[".", "config"];
const FILE_STEM: &str = "dropwatch";

/// Where the loaded configuration came from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigSource {
    #[default]
    Default,
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::Default => f.write_str("built-in defaults"),
            ConfigSource::EnvPath(path) => write!(f, "${CONFIG_PATH_ENV} ({})", path.display()),
            ConfigSource::EnvInline => write!(f, "${CONFIG_JSON_ENV}"),
            ConfigSource::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Serialization formats accepted for configuration documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    const ALL: [ConfigFormat; 2] = [ConfigFormat::Toml, ConfigFormat::Json];

    /// Format implied by a file extension, if any.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "toml" | "tml" => Some(ConfigFormat::Toml),
            "json" => Some(ConfigFormat::Json),
            _ => None,
        }
    }

    fn extension(self) -> &'static str {
        match self {
            ConfigFormat::Toml => "toml",
            ConfigFormat::Json => "json",
        }
    }

    /// Parse a whole document. On failure, the error names the first
    /// endpoint entry that does not deserialize, when one can be singled out.
    fn parse(self, raw: &str) -> anyhow::Result<IngestConfig> {
        let parsed: anyhow::Result<IngestConfig> = match self {
            ConfigFormat::Toml => toml::from_str(raw).map_err(anyhow::Error::from),
            ConfigFormat::Json => serde_json::from_str(raw).map_err(anyhow::Error::from),
        };
        parsed.map_err(|err| match self.locate_bad_endpoint(raw) {
            Some(endpoint) => err.context(endpoint),
            None => err,
        })
    }

    fn locate_bad_endpoint(self, raw: &str) -> Option<String> {
        match self {
            ConfigFormat::Toml => {
                let document: toml::Table = toml::from_str(raw).ok()?;
                let entries = document.get("endpoints")?.as_array()?;
                entries.iter().enumerate().find_map(|(index, entry)| {
                    let name = entry.get("name").and_then(toml::Value::as_str);
                    entry
                        .clone()
                        .try_into::<EndpointConfig>()
                        .err()
                        .map(|err| describe_endpoint(index, name, &err))
                })
            }
            ConfigFormat::Json => {
                let document: serde_json::Value = serde_json::from_str(raw).ok()?;
                let entries = document.get("endpoints")?.as_array()?;
                entries.iter().enumerate().find_map(|(index, entry)| {
                    let name = entry.get("name").and_then(serde_json::Value::as_str);
                    serde_json::from_value::<EndpointConfig>(entry.clone())
                        .err()
                        .map(|err| describe_endpoint(index, name, &err))
                })
            }
        }
    }
}

impl fmt::Display for ConfigFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConfigFormat::Toml => "TOML",
            ConfigFormat::Json => "JSON",
        })
    }
}

fn describe_endpoint(index: usize, name: Option<&str>, err: &dyn fmt::Display) -> String {
    match name {
        Some(name) => format!("endpoint #{} ({name:?}): {err}", index + 1),
        None => format!("endpoint #{}: {err}", index + 1),
    }
}

fn env_value(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Top-level configuration: one entry per ingestion endpoint.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct IngestConfig {
    pub endpoints: Vec<EndpointConfig>,
}

impl IngestConfig {
    /// Resolve configuration from `$DROPWATCH_CONFIG_PATH`, then
    /// `$DROPWATCH_CONFIG_JSON`, then the first well-known file found.
    /// Falls back to an empty configuration.
    pub fn load_from_env() -> anyhow::Result<(Self, ConfigSource)> {
        let (config, source) = if let Some(path) = env_value(CONFIG_PATH_ENV).map(PathBuf::from) {
            (Self::load_from_file(&path)?, ConfigSource::EnvPath(path))
        } else if let Some(raw) = env_value(CONFIG_JSON_ENV) {
            let config = ConfigFormat::Json
                .parse(&raw)
                .with_context(|| format!("invalid ${CONFIG_JSON_ENV}"))?;
            (config, ConfigSource::EnvInline)
        } else if let Some(path) = Self::find_default_file() {
            (Self::load_from_file(&path)?, ConfigSource::File(path))
        } else {
            (Self::default(), ConfigSource::Default)
        };

        debug!(source = %source, endpoints = config.endpoints.len(), "resolved dropwatch configuration");
        Ok((config, source))
    }

    /// Read a file, choosing the format from its extension. Unknown
    /// extensions go through [`IngestConfig::parse_from_str`].
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read dropwatch config {}", path.display()))?;

        match ConfigFormat::from_path(path) {
            Some(format) => format
                .parse(&contents)
                .with_context(|| format!("invalid {format} in {}", path.display())),
            None => Self::parse_from_str(&contents, &path.display().to_string()),
        }
    }

    /// Parse a document of unknown format: TOML first, then JSON.
    pub fn parse_from_str(contents: &str, origin: &str) -> anyhow::Result<Self> {
        let mut failures = Vec::with_capacity(ConfigFormat::ALL.len());
        for format in ConfigFormat::ALL {
            match format.parse(contents) {
                Ok(config) => return Ok(config),
                Err(err) => failures.push(format!("as {format}: {err:#}")),
            }
        }
        Err(anyhow!(
            "could not parse dropwatch config {origin} ({})",
            failures.join("; ")
        ))
    }

    /// Validated descriptors for every endpoint, in declaration order.
    pub fn descriptors(&self) -> anyhow::Result<Vec<EndpointDescriptor>> {
        let mut names = HashSet::new();
        for endpoint in &self.endpoints {
            if !names.insert(endpoint.name.as_str()) {
                bail!("duplicate endpoint name {:?}", endpoint.name);
            }
        }
        self.endpoints
            .iter()
            .map(EndpointConfig::to_descriptor)
            .collect()
    }

    /// `dropwatch.{toml,json}` in the working directory, then under `config/`.
    fn find_default_file() -> Option<PathBuf> {
        SEARCH_DIRS
            .iter()
            .flat_map(|dir| {
                ConfigFormat::ALL
                    .iter()
                    .map(move |format| Path::new(dir).join(format!("{FILE_STEM}.{}", format.extension())))
            })
            .find(|path| path.is_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HandlerConfig;

    #[test]
    fn empty_document_has_no_endpoints() {
        let config = IngestConfig::parse_from_str("", "inline").unwrap();
        assert!(config.endpoints.is_empty());
        assert!(config.descriptors().unwrap().is_empty());
    }

    #[test]
    fn json_falls_back_when_toml_fails() {
        let raw = r#"{"endpoints":[{"name":"a","drop_path":"/d","in_progress_path":"/i",
            "failure_path":"/f","handler":{"type":"command","program":"true"}}]}"#;
        let config = IngestConfig::parse_from_str(raw, "inline").unwrap();
        assert_eq!(
            config.endpoints[0].handler,
            HandlerConfig::Command {
                program: "true".into(),
                args: vec![]
            }
        );
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let raw = r#"
            [[endpoints]]
            name = "a"
            drop_path = "/d1"
            in_progress_path = "/i1"
            failure_path = "/f1"
            handler = { type = "accept" }

            [[endpoints]]
            name = "a"
            drop_path = "/d2"
            in_progress_path = "/i2"
            failure_path = "/f2"
            handler = { type = "accept" }
        "#;
        let config = IngestConfig::parse_from_str(raw, "inline").unwrap();
        let err = config.descriptors().unwrap_err();
        assert!(err.to_string().contains("duplicate endpoint name"));
    }

    #[test]
    fn garbage_reports_both_formats() {
        let err = IngestConfig::parse_from_str("endpoints = [", "inline").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("as TOML"));
        assert!(message.contains("as JSON"));
    }

    #[test]
    fn toml_errors_name_the_broken_endpoint() {
        let raw = r#"
            [[endpoints]]
            name = "fine"
            drop_path = "/d1"
            in_progress_path = "/i1"
            failure_path = "/f1"
            handler = { type = "accept" }

            [[endpoints]]
            name = "orders"
            drop_path = "/d2"
            in_progress_path = "/i2"
            failure_path = "/f2"
        "#;
        let err = ConfigFormat::Toml.parse(raw).unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains(r#"endpoint #2 ("orders")"#), "{message}");
        assert!(message.contains("handler"), "{message}");
    }

    #[test]
    fn json_errors_name_the_broken_endpoint() {
        let raw = r#"{"endpoints":[{"drop_path":"/d","in_progress_path":"/i",
            "failure_path":"/f","handler":{"type":"accept"},"workers":"many"}]}"#;
        let err = ConfigFormat::Json.parse(raw).unwrap_err();
        assert!(format!("{err:#}").contains("endpoint #1:"));
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(ConfigFormat::from_path(Path::new("a.toml")), Some(ConfigFormat::Toml));
        assert_eq!(ConfigFormat::from_path(Path::new("a.json")), Some(ConfigFormat::Json));
        assert_eq!(ConfigFormat::from_path(Path::new("a.conf")), None);
        assert_eq!(ConfigFormat::from_path(Path::new("dropwatch")), None);
    }
}
