//! Configuration management for mosaic
//!
//! This module handles loading, parsing, and validating configuration
//! from TOML files. It covers the render surface, the decoder pool and the
//! list of streams to composite.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::decode::{Pattern, DEFAULT_MAX_WORKERS};
use crate::renderer::{ResizePolicy, Size};
use crate::stream::StreamSpec;

/// Main configuration struct containing all mosaic settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MosaicConfig {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Render surface settings
    #[serde(default)]
    pub surface: SurfaceConfig,

    /// Decoder pool settings
    #[serde(default)]
    pub decode: DecodeConfig,

    /// Streams composited bottom to top
    #[serde(default = "MosaicConfig::default_streams")]
    pub streams: Vec<StreamConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneralConfig {
    /// Enable debug logging
    pub debug: bool,

    /// Log level used when `RUST_LOG` is unset ("error" .. "trace")
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SurfaceConfig {
    /// Initial window width (pixels)
    pub width: u32,

    /// Initial window height (pixels)
    pub height: u32,

    /// Window title
    pub title: String,

    /// RGBA clear color, each channel 0.0-1.0
    pub clear_color: [f64; 4],

    /// "auto", "fifo", "mailbox" or "immediate"
    pub present_mode: String,

    /// "auto", "vulkan", "gl", "metal" or "dx12"
    pub backend: String,

    /// Re-derive stream projections when the window is resized
    pub rederive_on_resize: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DecodeConfig {
    /// Maximum number of decoders running at once
    pub max_workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamConfig {
    /// Decoded frame width (pixels)
    pub width: u32,

    /// Decoded frame height (pixels)
    pub height: u32,

    /// Frames per second
    pub fps: f64,

    /// Opacity (0.0-1.0)
    pub alpha: f32,

    /// Initial offset in NDC units, +y down
    pub translate: [f32; 2],

    /// Initial scale factors
    pub scale: [f32; 2],

    /// "bars", "gradient" or "solid"
    pub pattern: String,

    /// Fill color for the solid pattern ("#RRGGBB")
    pub color: String,
}

impl Default for MosaicConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            surface: SurfaceConfig::default(),
            decode: DecodeConfig::default(),
            streams: Self::default_streams(),
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            debug: false,
            log_level: "info".to_string(),
        }
    }
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            title: "Mosaic".to_string(),
            clear_color: [0.0, 0.0, 0.0, 0.0],
            present_mode: "auto".to_string(),
            backend: "auto".to_string(),
            rederive_on_resize: true,
        }
    }
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fps: 30.0,
            alpha: 1.0,
            translate: [0.0, 0.0],
            scale: [1.0, 1.0],
            pattern: "bars".to_string(),
            color: "#ffffff".to_string(),
        }
    }
}

impl SurfaceConfig {
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn resize_policy(&self) -> ResizePolicy {
        if self.rederive_on_resize {
            ResizePolicy::Rederive
        } else {
            ResizePolicy::Preserve
        }
    }
}

impl StreamConfig {
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    /// Parses the pattern name (and color, for "solid").
    pub fn pattern(&self) -> Result<Pattern> {
        match self.pattern.as_str() {
            "bars" => Ok(Pattern::Bars),
            "gradient" => Ok(Pattern::Gradient),
            "solid" => Ok(Pattern::Solid(parse_hex_color(&self.color)?)),
            other => anyhow::bail!("Invalid stream pattern: {}", other),
        }
    }

    /// Registration spec for this stream.
    pub fn spec(&self) -> StreamSpec {
        StreamSpec::new(self.size())
            .with_alpha(self.alpha)
            .with_translate(self.translate[0], self.translate[1])
            .with_scale(self.scale[0], self.scale[1])
    }
}

/// Parses "#RRGGBB" (leading '#' optional).
pub fn parse_hex_color(s: &str) -> Result<[u8; 3]> {
    let hex = s.strip_prefix('#').unwrap_or(s);
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        anyhow::bail!("Invalid color: {} (expected #RRGGBB)", s);
    }

    let channel = |i: usize| {
        u8::from_str_radix(&hex[i..i + 2], 16).with_context(|| format!("Invalid color: {}", s))
    };
    Ok([channel(0)?, channel(2)?, channel(4)?])
}

/// Expands a leading `~` to the home directory
pub fn expand_home(path: &Path) -> Result<PathBuf> {
    if path.to_string_lossy().starts_with('~') {
        let home = std::env::var("HOME").context("Failed to get HOME environment variable")?;
        let rest = path.strip_prefix("~").unwrap_or(path);
        Ok(Path::new(&home).join(rest))
    } else {
        Ok(path.to_path_buf())
    }
}

impl MosaicConfig {
    fn default_streams() -> Vec<StreamConfig> {
        vec![
            StreamConfig::default(),
            StreamConfig {
                pattern: "gradient".to_string(),
                ..StreamConfig::default()
            },
        ]
    }

    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let expanded_path = expand_home(path.as_ref())?;

        let contents = fs::read_to_string(&expanded_path)
            .with_context(|| format!("Failed to read config file: {}", expanded_path.display()))?;

        let config: MosaicConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", expanded_path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            anyhow::bail!("Invalid log_level: {}", self.general.log_level);
        }

        if self.surface.width == 0 || self.surface.height == 0 {
            anyhow::bail!("Invalid surface size: width and height must be non-zero");
        }

        if self.surface.clear_color.iter().any(|c| !(0.0..=1.0).contains(c)) {
            anyhow::bail!("Invalid clear_color: channels must be between 0.0 and 1.0");
        }

        let valid_modes = ["auto", "fifo", "mailbox", "immediate"];
        if !valid_modes.contains(&self.surface.present_mode.as_str()) {
            anyhow::bail!("Invalid present_mode: {}", self.surface.present_mode);
        }

        let valid_backends = ["auto", "vulkan", "gl", "metal", "dx12"];
        if !valid_backends.contains(&self.surface.backend.as_str()) {
            anyhow::bail!("Invalid backend: {}", self.surface.backend);
        }

        if self.decode.max_workers == 0 {
            anyhow::bail!("Invalid max_workers: must be at least 1");
        }

        for (i, stream) in self.streams.iter().enumerate() {
            stream
                .validate()
                .with_context(|| format!("Invalid stream #{}", i))?;
        }

        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        fs::write(path, contents).context("Failed to write configuration file")?;

        Ok(())
    }

    /// Merge a partial configuration into this one
    /// Non-default values from the partial config will override this config
    pub fn merge_partial(mut self, partial: MosaicConfig) -> Self {
        let default_config = MosaicConfig::default();

        if partial.general != default_config.general {
            self.general = partial.general;
        }
        if partial.surface != default_config.surface {
            self.surface = partial.surface;
        }
        if partial.decode != default_config.decode {
            self.decode = partial.decode;
        }
        if partial.streams != default_config.streams {
            self.streams = partial.streams;
        }

        self
    }
}

impl StreamConfig {
    fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            anyhow::bail!("width and height must be non-zero");
        }
        if !(self.fps > 0.0 && self.fps <= 240.0) {
            anyhow::bail!("fps must be between 0 and 240");
        }
        if !(0.0..=1.0).contains(&self.alpha) {
            anyhow::bail!("alpha must be between 0.0 and 1.0");
        }
        if self.translate.iter().any(|t| !t.is_finite()) {
            anyhow::bail!("translate must be finite");
        }
        if self.scale.iter().any(|s| !s.is_finite() || *s == 0.0) {
            anyhow::bail!("scale must be finite and non-zero");
        }
        self.pattern()?;
        Ok(())
    }
}


#[cfg(test)]
mod property_tests;
