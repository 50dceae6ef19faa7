//! Pipeline configuration
//!
//! Deserializes the TOML pipeline description: where the dataset lives,
//! which sub-directories feed which bands, and the class palette. The
//! `[model]` table is carried opaquely for downstream consumers; nothing
//! here interprets it.

use crate::channel::{ChannelError, ChannelSource};
use crate::palette::{named, ClassPalette, PaletteError};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading or validating a pipeline configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Unknown color name '{0}' in [classes]")]
    UnknownColorName(String),

    #[error("No [[channels]] entries in config")]
    NoChannels,

    #[error(transparent)]
    Palette(#[from] PaletteError),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// `[dataset]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct DatasetSection {
    /// Root directory holding one tile pyramid per sub-directory
    pub path: PathBuf,
    /// Sub-directory holding label tiles, when the dataset has any
    #[serde(default)]
    pub labels: Option<String>,
}

/// `[classes]` section: parallel title/color lists, one entry per class.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassesSection {
    pub titles: Vec<String>,
    pub colors: Vec<String>,
}

/// One `[[channels]]` entry: a pyramid sub-directory and the 1-based
/// bands to take from its tiles.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelSection {
    pub sub: String,
    pub bands: Vec<u32>,
}

/// Deserialized pipeline configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub dataset: DatasetSection,
    pub classes: ClassesSection,
    pub channels: Vec<ChannelSection>,
    /// Opaque model hyperparameters, passed through untouched
    #[serde(default)]
    pub model: toml::value::Table,
}

impl PipelineConfig {
    /// Parses a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Reads and parses a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Builds the class palette from the `[classes]` section.
    ///
    /// Colors are CSS3 extended names or `#rrggbb` hex strings.
    pub fn palette(&self) -> Result<ClassPalette, ConfigError> {
        let mut colors = Vec::with_capacity(self.classes.colors.len());
        for name in &self.classes.colors {
            let color = named::resolve(name)
                .ok_or_else(|| ConfigError::UnknownColorName(name.clone()))?;
            colors.push(color);
        }
        Ok(ClassPalette::new(self.classes.titles.clone(), colors)?)
    }

    /// Builds the channel sources from the `[[channels]]` entries.
    pub fn channel_sources(&self) -> Result<Vec<ChannelSource>, ConfigError> {
        if self.channels.is_empty() {
            return Err(ConfigError::NoChannels);
        }
        self.channels
            .iter()
            .map(|c| Ok(ChannelSource::new(c.sub.clone(), c.bands.clone())?))
            .collect()
    }
}
