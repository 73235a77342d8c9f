use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::assets::LocatorSettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip)]
    pub data_dir: PathBuf,
    #[serde(default = "default_true")]
    pub enable_catchphrase: bool,
    #[serde(default = "default_image_formats")]
    pub image_formats: Vec<String>,
    #[serde(default)]
    pub default_messages: DefaultMessages,
    #[serde(default)]
    pub assets: AssetConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultMessages {
    #[serde(default = "default_no_image")]
    pub no_image: String,
    #[serde(default = "default_already_checkin")]
    pub already_checkin: String,
    #[serde(default = "default_no_idol")]
    pub no_idol: String,
}

impl Default for DefaultMessages {
    fn default() -> Self {
        DefaultMessages {
            no_image: default_no_image(),
            already_checkin: default_already_checkin(),
            no_idol: default_no_idol(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetConfig {
    /// Image roots in probe order. Empty means `<data_dir>/img`.
    #[serde(default)]
    pub roots: Vec<PathBuf>,
    /// Treat `roots[0]` as the discovery root for the external content tree.
    #[serde(default)]
    pub discovery_root: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery_subdirs: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_subdirs: Option<Vec<String>>,
}

fn default_true() -> bool {
    true
}

fn default_image_formats() -> Vec<String> {
    LocatorSettings::default().extensions
}

fn default_no_image() -> String {
    "暂时还没有解锁这位小偶像哦。".to_string()
}

fn default_already_checkin() -> String {
    "你今天已经签到过了哦~".to_string()
}

fn default_no_idol() -> String {
    "还没有添加任何小偶像，无法签到！请先用 /add 添加。".to_string()
}

impl Config {
    pub fn new(data_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("sixsixbot")
        });

        std::fs::create_dir_all(&data_dir)
            .context("Failed to create data directory")?;

        let config_path = data_dir.join("config.json");

        if config_path.exists() {
            let config_str = std::fs::read_to_string(&config_path)
                .context("Failed to read config.json")?;

            if config_str.trim().is_empty() {
                warn!(path = %config_path.display(), "config file is empty, writing defaults");
            } else {
                match serde_json::from_str::<Config>(&config_str) {
                    Ok(mut config) => {
                        config.data_dir = data_dir;
                        return Ok(config);
                    }
                    Err(e) => {
                        warn!(path = %config_path.display(), error = %e, "failed to parse config.json, using defaults");
                        return Ok(Self::default_config(data_dir));
                    }
                }
            }
        }

        let config = Self::default_config(data_dir);
        config.save()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = self.data_dir.join("config.json");
        let json_str = serde_json::to_string_pretty(self)
            .context("Failed to serialize config")?;
        std::fs::write(&config_path, json_str)
            .context("Failed to write config.json")?;
        Ok(())
    }

    pub fn default_config(data_dir: PathBuf) -> Self {
        Config {
            data_dir,
            enable_catchphrase: true,
            image_formats: default_image_formats(),
            default_messages: DefaultMessages::default(),
            assets: AssetConfig::default(),
        }
    }

    pub fn image_dir(&self) -> PathBuf {
        self.data_dir.join("img")
    }

    pub fn locator_settings(&self) -> LocatorSettings {
        let defaults = LocatorSettings::default();
        let roots = if self.assets.roots.is_empty() {
            vec![self.image_dir()]
        } else {
            self.assets.roots.clone()
        };

        LocatorSettings {
            roots,
            discovery_root: self.assets.discovery_root,
            marker: self.assets.marker.clone().unwrap_or(defaults.marker),
            discovery_subdirs: self
                .assets
                .discovery_subdirs
                .clone()
                .unwrap_or(defaults.discovery_subdirs),
            fallback_subdirs: self
                .assets
                .fallback_subdirs
                .clone()
                .unwrap_or(defaults.fallback_subdirs),
            extensions: self.image_formats.clone(),
        }
    }
}
