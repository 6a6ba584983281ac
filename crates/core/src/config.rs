//! Application configuration.
//!
//! Values come from [`AppConfig::default`] and can be overridden through
//! `KILN_*` environment variables. Loading from files or the command line is
//! left to the embedding application.

use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Prefix shared by every environment override.
pub const ENV_PREFIX: &str = "KILN_";

/// Settings consumed by the window, the render target and the driving loop.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Window title.
    pub title: String,
    /// Initial window width in physical pixels.
    pub width: u32,
    /// Initial window height in physical pixels.
    pub height: u32,
    /// Start in borderless fullscreen.
    pub fullscreen: bool,
    /// Present with FIFO when set.
    pub vsync: bool,
    /// Prefer MAILBOX over IMMEDIATE when vsync is off.
    pub triple_buffer: bool,
    /// Frames per second cap, `0` for none.
    pub fps_cap: u32,
    /// Enable the Khronos validation layer.
    pub validation: bool,
    /// Directory holding the compiled SPIR-V shaders.
    pub shader_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "kiln".to_string(),
            width: 1280,
            height: 720,
            fullscreen: false,
            vsync: false,
            triple_buffer: true,
            fps_cap: 0,
            validation: cfg!(debug_assertions),
            shader_dir: PathBuf::from("shaders/spirv"),
        }
    }
}

impl AppConfig {
    /// Builds a configuration from the defaults and the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from the defaults and a key lookup.
    ///
    /// `lookup` receives full variable names such as `KILN_VSYNC`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(title) = get("TITLE") {
            config.title = title;
        }
        if let Some(value) = get("WIDTH") {
            config.width = parse_number("WIDTH", &value)?;
        }
        if let Some(value) = get("HEIGHT") {
            config.height = parse_number("HEIGHT", &value)?;
        }
        if let Some(value) = get("FULLSCREEN") {
            config.fullscreen = parse_flag("FULLSCREEN", &value)?;
        }
        if let Some(value) = get("VSYNC") {
            config.vsync = parse_flag("VSYNC", &value)?;
        }
        if let Some(value) = get("TRIPLE_BUFFER") {
            config.triple_buffer = parse_flag("TRIPLE_BUFFER", &value)?;
        }
        if let Some(value) = get("FPS_CAP") {
            config.fps_cap = parse_number("FPS_CAP", &value)?;
        }
        if let Some(value) = get("VALIDATION") {
            config.validation = parse_flag("VALIDATION", &value)?;
        }
        if let Some(dir) = get("SHADER_DIR") {
            config.shader_dir = PathBuf::from(dir);
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks values that would make window or swapchain creation fail.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::Config(format!(
                "window size must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        Ok(())
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!(
            "{ENV_PREFIX}{name}: expected a boolean, got '{other}'"
        ))),
    }
}

fn parse_number<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        Error::Config(format!(
            "{ENV_PREFIX}{name}: expected an unsigned integer, got '{value}'"
        ))
    })
}
