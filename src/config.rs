//! Application configuration, stored as TOML under `~/.config/stimlink/`
//!
//! Every section falls back to defaults field by field, so a partial or older
//! file still loads. Components never read the file; they get plain settings
//! values built from it here.

use std::path::{Path, PathBuf};
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::controller::{AnalogSettings, SamplerSettings};
use crate::mapping::repeat::MIN_REPEAT_INTERVAL;
use crate::mapping::{BindingNames, Bindings, EngineSettings, StepSizes};
use crate::parameters::Limits;
use crate::session::{Credentials, Origin, ReconnectPolicy, SessionOptions};

const CONFIG_DIR: &str = ".config/stimlink";
const CONFIG_FILE: &str = "config.toml";

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub gamepad: GamepadConfig,
    pub throttle: ThrottleConfig,
    pub steps: StepSizes,
    pub limits: Limits,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    /// Port of the server's web UI; the session port is the next one up
    pub http_port: Option<u16>,
    /// Explicit session port, wins over `http_port`
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            http_port: None,
            port: None,
            username: None,
            password: None,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct GamepadConfig {
    pub enabled: bool,
    pub dead_zone: f32,
    pub invert_horizontal: bool,
    pub invert_vertical: bool,
    pub trigger_threshold: f32,
    pub repeat_interval_ms: u64,
    pub tick_ms: u64,
    pub idle_poll_ms: u64,
    /// Button name per action, or `none`
    pub bindings: BindingNames,
}

impl Default for GamepadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dead_zone: 0.15,
            invert_horizontal: false,
            invert_vertical: false,
            trigger_threshold: 0.5,
            repeat_interval_ms: 100,
            tick_ms: 16,
            idle_poll_ms: 500,
            bindings: BindingNames::default(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq)]
#[serde(default)]
pub struct ThrottleConfig {
    pub slider_ms: u64,
    pub position_ms: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            slider_ms: 50,
            position_ms: 100,
        }
    }
}

impl AppConfig {
    pub fn config_path() -> PathBuf {
        let mut path = get_home_dir();
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    /// Writes a default config to `path` unless one exists; returns true if it wrote
    pub async fn ensure_default_config(path: &Path) -> Result<bool> {
        if tokio::fs::try_exists(path)
            .await
            .map_err(|e| eyre!("Failed to check if config file exists: {}", e))?
        {
            debug!("Config file present at {}", path.display());
            return Ok(false);
        }
        info!("Creating default config at {}", path.display());
        AppConfig::default().save_to(path).await?;
        Ok(true)
    }

    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| eyre!("Failed to parse config file: {}", e))
    }

    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| eyre!("Failed to serialize config: {}", e))?;
        tokio::fs::write(path, content)
            .await
            .map_err(|e| eyre!("Failed to write config file: {}", e))?;
        debug!("Config saved to {}", path.display());
        Ok(())
    }

    pub fn session_options(&self) -> SessionOptions {
        let credentials = match (&self.server.username, &self.server.password) {
            (Some(username), Some(password)) => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            (Some(_), None) | (None, Some(_)) => {
                warn!("Ignoring incomplete server credentials");
                None
            }
            (None, None) => None,
        };
        SessionOptions {
            origin: Origin::new(self.server.host.clone(), self.server.http_port),
            credentials,
            reconnect: ReconnectPolicy::default(),
        }
    }

    pub fn sampler_settings(&self) -> SamplerSettings {
        let gamepad = &self.gamepad;
        SamplerSettings {
            analog: AnalogSettings {
                invert_horizontal: gamepad.invert_horizontal,
                invert_vertical: gamepad.invert_vertical,
                ..Default::default()
            }
            .with_dead_zone(gamepad.dead_zone),
            trigger_threshold: gamepad.trigger_threshold,
            tick: Duration::from_millis(gamepad.tick_ms.max(1)),
            idle_poll: Duration::from_millis(gamepad.idle_poll_ms.max(1)),
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            position_window: Duration::from_millis(self.throttle.position_ms),
            repeat_interval: Duration::from_millis(self.gamepad.repeat_interval_ms)
                .max(MIN_REPEAT_INTERVAL),
            steps: self.steps,
            bindings: Bindings::from_names_lossy(&self.gamepad.bindings),
        }
    }

    pub fn slider_window(&self) -> Duration {
        Duration::from_millis(self.throttle.slider_ms)
    }
}

fn get_home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| {
        warn!("Could not determine home directory, using current directory");
        PathBuf::from(".")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ButtonId;
    use crate::mapping::Action;

    #[test]
    fn partial_file_fills_in_defaults() {
        let config = AppConfig::parse(
            r#"
            [server]
            host = "10.0.0.5"
            http_port = 5000

            [gamepad]
            dead_zone = 0.2
            invert_vertical = true

            [gamepad.bindings]
            shock = "y"
            mute = "none"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.host, "10.0.0.5");
        assert_eq!(config.throttle, ThrottleConfig::default());
        assert_eq!(config.limits, Limits::default());

        let endpoint = config.session_options().origin.resolve(None, None);
        assert_eq!(endpoint.port, 5001);

        let sampler = config.sampler_settings();
        assert_eq!(sampler.analog.dead_zone, 0.2);
        assert!(sampler.analog.invert_vertical);
        assert!(!sampler.analog.invert_horizontal);

        let engine = config.engine_settings();
        assert_eq!(engine.bindings.button_for(Action::Shock), Some(ButtonId::Y));
        assert_eq!(engine.bindings.button_for(Action::Mute), None);
        // actions missing from the file keep their default button
        assert_eq!(
            engine.bindings.button_for(Action::VolumeUp),
            Some(ButtonId::DpadUp)
        );
    }

    #[test]
    fn out_of_range_values_are_tamed() {
        let config = AppConfig::parse(
            r#"
            [gamepad]
            dead_zone = 3.0
            repeat_interval_ms = 1
            "#,
        )
        .unwrap();
        assert_eq!(config.sampler_settings().analog.dead_zone, 1.0);
        assert_eq!(config.engine_settings().repeat_interval, MIN_REPEAT_INTERVAL);
    }

    #[test]
    fn credentials_need_both_halves() {
        let mut config = AppConfig::default();
        config.server.username = Some("user".into());
        assert!(config.session_options().credentials.is_none());
        config.server.password = Some("secret".into());
        assert!(config.session_options().credentials.is_some());
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(AppConfig::parse("[server\nhost = ").is_err());
    }

    #[tokio::test]
    async fn default_config_round_trips_through_disk() {
        let dir = std::env::temp_dir().join(format!("stimlink-config-{}", std::process::id()));
        let path = dir.join("config.toml");
        let _ = tokio::fs::remove_dir_all(&dir).await;

        assert!(AppConfig::ensure_default_config(&path).await.unwrap());
        assert!(!AppConfig::ensure_default_config(&path).await.unwrap());
        let loaded = AppConfig::load_from(&path).await.unwrap();
        assert_eq!(loaded, AppConfig::default());

        let mut changed = loaded;
        changed.gamepad.enabled = false;
        changed.steps.carrier = 25.0;
        changed.save_to(&path).await.unwrap();
        assert_eq!(AppConfig::load_from(&path).await.unwrap(), changed);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
