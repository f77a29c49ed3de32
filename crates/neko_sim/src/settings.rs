use std::fs;
use std::path::Path;

use glam::Vec2;
use serde::Deserialize;

use crate::behaviour::Behaviour;
use crate::controller::ControllerConfig;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub size: f32,
    pub speed: f32,
    pub transparency: f32,
    pub behaviour: Behaviour,
    pub rotate_behaviours: bool,
    pub idle_fidget: bool,
    /// Screen size in device pixels.
    pub display: Vec2,
    pub density: f32,
    pub interval_ms: u64,
    pub park_when_idle: bool,
    pub seed: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        let controller = ControllerConfig::default();
        Self {
            size: 80.0,
            speed: 1.0,
            transparency: 0.0,
            behaviour: Behaviour::default(),
            rotate_behaviours: false,
            idle_fidget: false,
            display: controller.display_size,
            density: 1.0,
            interval_ms: controller.interval_ms,
            park_when_idle: true,
            seed: None,
        }
    }
}

impl Settings {
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            interval_ms: self.interval_ms,
            sprite_size: Vec2::splat(self.size * self.density),
            display_size: self.display,
            speed_factor: self.speed,
            behaviour: self.behaviour,
            rotate_behaviours: self.rotate_behaviours,
            idle_fidget: self.idle_fidget,
            park_when_idle: self.park_when_idle,
            seed: self.seed,
        }
    }
}

pub fn load_settings_from_path(path: &Path) -> Result<Settings, String> {
    let raw =
        fs::read_to_string(path).map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
    let settings: Settings = serde_json::from_str(&raw)
        .map_err(|e| format!("Failed to parse settings JSON {}: {e}", path.display()))?;
    validate_settings(&settings)?;
    Ok(settings)
}

fn validate_settings(settings: &Settings) -> Result<(), String> {
    if !(settings.size > 0.0) {
        return Err("Settings validation failed: size must be > 0".to_string());
    }
    if !(settings.density > 0.0) {
        return Err("Settings validation failed: density must be > 0".to_string());
    }
    if !(0.0..=1.0).contains(&settings.transparency) {
        return Err("Settings validation failed: transparency must be within 0..=1".to_string());
    }
    if settings.interval_ms == 0 {
        return Err("Settings validation failed: interval_ms must be > 0".to_string());
    }
    if settings.display.x < 1.0 || settings.display.y < 1.0 {
        return Err("Settings validation failed: display must be at least 1x1".to_string());
    }
    Ok(())
}
