use clap::Args;
use clap::builder::FalseyValueParser;
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_SNAPSHOT_PATH: &str = "target/gauntlet-snapshot.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("GEMINI_API_KEY is not set; export it or add it to .env")]
    MissingApiKey,
    #[error("Unknown theme {0:?}")]
    UnknownTheme(String),
}

/// Live-play settings. Every flag falls back to an environment variable, and
/// `.env` is loaded before parsing.
#[derive(Debug, Clone, Args)]
pub struct PlayConfig {
    /// Gemini API key
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Gemini model name
    #[arg(long, env = "GEMINI_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    /// File backing the local crash-recovery snapshot
    #[arg(long, env = "FG_SNAPSHOT_PATH", default_value = DEFAULT_SNAPSHOT_PATH)]
    pub snapshot_path: PathBuf,

    /// Disable crash recovery entirely
    #[arg(long, env = "FG_DISABLE_LOCAL_RECOVERY", value_parser = FalseyValueParser::new())]
    pub disable_local_recovery: bool,

    /// Public URL printed in the share text
    #[arg(long, env = "APP_PUBLIC_URL", default_value = "")]
    pub app_url: String,

    /// Startup theme
    #[arg(long, default_value = gauntlet_game::constants::DEFAULT_THEME)]
    pub theme: String,

    /// Player handle for the leaderboard
    #[arg(long, default_value = "")]
    pub handle: String,

    /// Clan (syndicate) name
    #[arg(long, default_value = "")]
    pub clan: String,

    /// Plain-text pitch document to cross-reference
    #[arg(long)]
    pub document: Option<PathBuf>,
}

impl PlayConfig {
    /// # Errors
    ///
    /// Fails when no key was configured.
    pub fn api_key(&self) -> Result<&str, ConfigError> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or(ConfigError::MissingApiKey)
    }
}

pub fn split_csv(s: &str) -> Vec<String> {
    s.split(',')
        .map(|x| x.trim().to_string())
        .filter(|x| !x.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Debug, Parser)]
    struct Wrapper {
        #[command(flatten)]
        play: PlayConfig,
    }

    #[test]
    fn split_csv_trims_and_filters() {
        let parts = split_csv(" alpha, ,beta,  gamma ");
        assert_eq!(parts, vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn blank_api_key_is_missing() {
        let wrapper = Wrapper::parse_from(["test", "--api-key", "  ", "--model", "m"]);
        assert!(matches!(
            wrapper.play.api_key(),
            Err(ConfigError::MissingApiKey)
        ));
        let wrapper = Wrapper::parse_from(["test", "--api-key", "k", "--model", "m"]);
        assert_eq!(wrapper.play.api_key().unwrap(), "k");
        assert_eq!(wrapper.play.theme, "General SaaS");
    }
}
