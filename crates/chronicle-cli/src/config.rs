use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::cli::Cli;

/// Which persistence backend a repair session is bound to (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Rewrite,
    EventStore,
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "rewrite" => Ok(Self::Rewrite),
            "event_store" | "event-store" => Ok(Self::EventStore),
            other => Err(format!("unknown provider `{other}`, expected rewrite|event_store")),
        }
    }
}

/// The options enumerated in spec.md §6 "Configuration", merged from (in
/// increasing precedence) built-in defaults, an optional TOML config file,
/// environment variables, and CLI flags — the same layered pattern as the
/// source's `LogRotationPolicy::from_env` generalized to a full struct.
#[derive(Debug, Clone)]
pub struct Config {
    pub provider: ProviderKind,
    pub min_similarity_score: f64,
    pub top_k_candidates: usize,
    pub undo_stack_depth: usize,
    pub oversize_record_bytes: usize,
    pub session_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub event_store_endpoint: PathBuf,
    pub operator_id: String,
}

/// Mirrors [`Config`] but with every field optional, for deserializing a
/// partial TOML file that only overrides a few defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct FileConfig {
    provider: Option<String>,
    min_similarity_score: Option<f64>,
    top_k_candidates: Option<usize>,
    undo_stack_depth: Option<usize>,
    oversize_record_bytes: Option<usize>,
    session_dir: Option<PathBuf>,
    backup_dir: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    event_store_endpoint: Option<PathBuf>,
    operator_id: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: ProviderKind::EventStore,
            min_similarity_score: chronicle_similarity::DEFAULT_MIN_SCORE,
            top_k_candidates: chronicle_similarity::DEFAULT_TOP_K,
            undo_stack_depth: chronicle_store::DEFAULT_UNDO_STACK_DEPTH,
            oversize_record_bytes: chronicle_dedup::DEFAULT_OVERSIZE_RECORD_BYTES,
            session_dir: PathBuf::from("."),
            backup_dir: PathBuf::from(".chronicle/backups"),
            cache_dir: PathBuf::from(".chronicle/cache"),
            event_store_endpoint: PathBuf::from(".chronicle/events"),
            operator_id: "chronicle-cli".to_string(),
        }
    }
}

impl Config {
    /// Builds the effective configuration: defaults, then an optional TOML
    /// file (`--config`, falling back to `CHRONICLE_CONFIG`), then
    /// `CHRONICLE_*` environment variables, then explicit CLI flags —
    /// each layer only overrides fields the layer below it actually set.
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut config = Self::default();

        let config_path = cli.config.clone().or_else(|| std::env::var("CHRONICLE_CONFIG").ok().map(PathBuf::from));
        if let Some(path) = config_path {
            config.apply_file(&path)?;
        }

        config.apply_env();
        config.apply_cli(cli)?;
        Ok(config)
    }

    fn apply_file(&mut self, path: &Path) -> Result<()> {
        let text = std::fs::read_to_string(path).with_context(|| format!("failed to read config file {}", path.display()))?;
        let file: FileConfig = toml::from_str(&text).with_context(|| format!("failed to parse config file {}", path.display()))?;

        if let Some(provider) = file.provider {
            self.provider = provider.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(value) = file.min_similarity_score {
            self.min_similarity_score = value;
        }
        if let Some(value) = file.top_k_candidates {
            self.top_k_candidates = value;
        }
        if let Some(value) = file.undo_stack_depth {
            self.undo_stack_depth = value;
        }
        if let Some(value) = file.oversize_record_bytes {
            self.oversize_record_bytes = value;
        }
        if let Some(value) = file.session_dir {
            self.session_dir = value;
        }
        if let Some(value) = file.backup_dir {
            self.backup_dir = value;
        }
        if let Some(value) = file.cache_dir {
            self.cache_dir = value;
        }
        if let Some(value) = file.event_store_endpoint {
            self.event_store_endpoint = value;
        }
        if let Some(value) = file.operator_id {
            self.operator_id = value;
        }
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Ok(value) = std::env::var("CHRONICLE_PROVIDER") {
            if let Ok(provider) = value.parse() {
                self.provider = provider;
            }
        }
        if let Some(value) = parse_env("CHRONICLE_MIN_SIMILARITY_SCORE") {
            self.min_similarity_score = value;
        }
        if let Some(value) = parse_env("CHRONICLE_TOP_K_CANDIDATES") {
            self.top_k_candidates = value;
        }
        if let Some(value) = parse_env("CHRONICLE_UNDO_STACK_DEPTH") {
            self.undo_stack_depth = value;
        }
        if let Some(value) = parse_env("CHRONICLE_OVERSIZE_RECORD_BYTES") {
            self.oversize_record_bytes = value;
        }
        if let Ok(value) = std::env::var("CHRONICLE_SESSION_DIR") {
            self.session_dir = PathBuf::from(value);
        }
        if let Ok(value) = std::env::var("CHRONICLE_BACKUP_DIR") {
            self.backup_dir = PathBuf::from(value);
        }
        if let Ok(value) = std::env::var("CHRONICLE_CACHE_DIR") {
            self.cache_dir = PathBuf::from(value);
        }
        if let Ok(value) = std::env::var("CHRONICLE_EVENT_STORE_ENDPOINT") {
            self.event_store_endpoint = PathBuf::from(value);
        }
        if let Ok(value) = std::env::var("CHRONICLE_OPERATOR_ID") {
            self.operator_id = value;
        }
    }

    fn apply_cli(&mut self, cli: &Cli) -> Result<()> {
        if let Some(provider) = &cli.provider {
            self.provider = provider.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(value) = cli.min_similarity_score {
            self.min_similarity_score = value;
        }
        if let Some(value) = cli.top_k_candidates {
            self.top_k_candidates = value;
        }
        if let Some(value) = cli.undo_stack_depth {
            self.undo_stack_depth = value;
        }
        if let Some(value) = cli.oversize_record_bytes {
            self.oversize_record_bytes = value;
        }
        if let Some(value) = &cli.session_dir {
            self.session_dir = value.clone();
        }
        if let Some(value) = &cli.backup_dir {
            self.backup_dir = value.clone();
        }
        if let Some(value) = &cli.cache_dir {
            self.cache_dir = value.clone();
        }
        if let Some(value) = &cli.event_store_endpoint {
            self.event_store_endpoint = value.clone();
        }
        if let Some(value) = &cli.operator_id {
            self.operator_id = value.clone();
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|value| value.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    #[test]
    fn defaults_are_event_store_backed() {
        let cli = Cli::parse_from(["chronicle", "scan", "--session", "s"]);
        let config = Config::load(&cli).unwrap();
        assert_eq!(config.provider, ProviderKind::EventStore);
        assert_eq!(config.top_k_candidates, chronicle_similarity::DEFAULT_TOP_K);
    }

    #[test]
    fn cli_flags_take_precedence_over_file_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("chronicle.toml");
        std::fs::write(&config_path, "top-k-candidates = 2\nprovider = \"rewrite\"\n").unwrap();
        std::env::set_var("CHRONICLE_TOP_K_CANDIDATES", "3");

        let cli = Cli::parse_from([
            "chronicle",
            "--config",
            config_path.to_str().unwrap(),
            "--top-k-candidates",
            "7",
            "scan",
            "--session",
            "s",
        ]);
        let config = Config::load(&cli).unwrap();
        assert_eq!(config.top_k_candidates, 7);
        assert_eq!(config.provider, ProviderKind::Rewrite);

        std::env::remove_var("CHRONICLE_TOP_K_CANDIDATES");
    }

    #[test]
    fn provider_kind_parses_both_spellings() {
        assert_eq!("event_store".parse::<ProviderKind>().unwrap(), ProviderKind::EventStore);
        assert_eq!("event-store".parse::<ProviderKind>().unwrap(), ProviderKind::EventStore);
        assert!("bogus".parse::<ProviderKind>().is_err());
    }
}
