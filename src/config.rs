//! Layered settings: built-in defaults, the user config file, then environment.

use config::{Config, Environment, File, FileFormat};
use dirs_next::config_dir;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::Translation;

const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");
pub const ENV_PREFIX: &str = "ANIMEHUB";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub api: ApiSettings,
    pub providers: ProviderSettings,
    pub player: PlayerSettings,
    pub search: SearchSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    /// Episode lists, stream sources and recent episodes.
    pub kenjitsu: String,
    /// Search and anime info.
    pub anilist_meta: String,
    /// Trending and popular listings.
    pub trending_meta: String,
    /// Advanced (genre) search and the airing schedule.
    pub advanced_meta: String,
    /// HiAnime recent releases.
    pub consumet: String,
    pub user_agent: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub default: String,
    pub translation: Translation,
    pub quality_preference: Vec<String>,
    pub hianime: HianimeSettings,
    pub animepahe: AnimepaheSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HianimeSettings {
    pub proxy: String,
    pub server: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnimepaheSettings {
    pub proxy: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSettings {
    pub command: String,
    pub volume: f64,
    pub seek_step_secs: f64,
    pub controls_hide_secs: f64,
    pub settle_delay_ms: u64,
    /// Preferred subtitle language label; empty picks the provider default.
    pub subtitle_language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    pub debounce_ms: u64,
    pub suggestion_limit: usize,
}

impl Settings {
    /// Loads defaults, then `path` (or the user config file), then `ANIMEHUB__*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let user_path = path.map(Path::to_path_buf).or_else(Self::config_path);
        let mut builder =
            Config::builder().add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml));
        if let Some(user_path) = &user_path {
            debug!(path = %user_path.display(), "Layering user config");
            builder = builder.add_source(File::from(user_path.clone()).required(false));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<Settings>()?;
        settings.player.validate()?;
        Ok(settings)
    }

    /// Built-in defaults only.
    pub fn defaults() -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
            .build()?
            .try_deserialize::<Settings>()?;
        settings.player.validate()?;
        Ok(settings)
    }

    pub fn config_path() -> Option<PathBuf> {
        config_dir().map(|base| base.join("animehub").join("config.toml"))
    }

    pub fn to_toml(&self) -> std::result::Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl ApiSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl PlayerSettings {
    /// Rejects values the player cannot turn into a volume, seek step or delay.
    pub fn validate(&self) -> Result<()> {
        self.controls_hide_delay()?;
        for (key, value) in [
            ("player.volume", self.volume),
            ("player.seek_step_secs", self.seek_step_secs),
        ] {
            if !value.is_finite() {
                return Err(invalid(key, value));
            }
        }
        Ok(())
    }

    pub fn controls_hide_delay(&self) -> Result<Duration> {
        Duration::try_from_secs_f64(self.controls_hide_secs)
            .map_err(|_| invalid("player.controls_hide_secs", self.controls_hide_secs))
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn preferred_subtitle(&self) -> Option<&str> {
        Some(self.subtitle_language.trim()).filter(|lang| !lang.is_empty())
    }
}

fn invalid(key: &str, value: impl Display) -> Error {
    Error::Config(config::ConfigError::Message(format!(
        "{key} = {value} is out of range"
    )))
}

impl SearchSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_parse() {
        let settings = Settings::defaults().unwrap();
        assert_eq!(settings.providers.default, "hianime");
        assert_eq!(settings.providers.translation, Translation::Sub);
        assert_eq!(settings.providers.quality_preference, ["1080p", "720p"]);
        assert_eq!(settings.player.controls_hide_delay().unwrap(), Duration::from_secs(3));
        assert_eq!(settings.player.settle_delay(), Duration::from_millis(100));
        assert_eq!(settings.search.debounce(), Duration::from_millis(300));
        assert!(settings.player.preferred_subtitle().is_none());
    }

    #[test]
    fn user_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[player]\ncommand = \"mpv --no-border\"\nsubtitle_language = \"Spanish\"\n\n[providers]\ntranslation = \"dub\""
        )
        .unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.player.command, "mpv --no-border");
        assert_eq!(settings.player.preferred_subtitle(), Some("Spanish"));
        assert_eq!(settings.providers.translation, Translation::Dub);
        // untouched keys keep their defaults
        assert_eq!(settings.player.seek_step_secs, 10.0);
    }

    #[test]
    fn out_of_range_player_numbers_are_config_errors() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[player]\ncontrols_hide_secs = inf").unwrap();
        let err = Settings::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("controls_hide_secs"));

        let mut player = Settings::defaults().unwrap().player;
        player.controls_hide_secs = -1.0;
        assert!(player.controls_hide_delay().is_err());
        player.controls_hide_secs = 0.5;
        player.seek_step_secs = f64::NAN;
        assert!(matches!(player.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn round_trips_through_toml() {
        let settings = Settings::defaults().unwrap();
        let rendered = settings.to_toml().unwrap();
        assert!(rendered.contains("[providers.hianime]"));
    }
}
