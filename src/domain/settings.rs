use crate::domain::models::BdAddr;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "debug".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "tws_topology".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Tunables of the procedures themselves
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologySettings {
    /// How long the Primary stays connectable before giving up on the peer
    #[serde(default = "default_connectable_peer_timeout_ms")]
    pub connectable_peer_timeout_ms: u64,
    /// Ceiling on radio address override attempts
    #[serde(default = "default_address_override_max_attempts")]
    pub address_override_max_attempts: u32,
}

impl TopologySettings {
    pub fn connectable_peer_timeout(&self) -> Duration {
        Duration::from_millis(self.connectable_peer_timeout_ms)
    }
}

impl Default for TopologySettings {
    fn default() -> Self {
        Self {
            connectable_peer_timeout_ms: default_connectable_peer_timeout_ms(),
            address_override_max_attempts: default_address_override_max_attempts(),
        }
    }
}

fn default_connectable_peer_timeout_ms() -> u64 {
    10_000
}
fn default_address_override_max_attempts() -> u32 {
    1000
}

/// Behaviour of the simulated collaborators used by the binary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationSettings {
    #[serde(default = "default_primary_address")]
    pub primary_address: BdAddr,
    #[serde(default = "default_secondary_address")]
    pub secondary_address: BdAddr,
    /// Address overrides that fail before the radio reports idle
    #[serde(default = "default_override_failures")]
    pub override_failures: u32,
    #[serde(default = "default_role_latency_ms")]
    pub role_latency_ms: u64,
    #[serde(default = "default_peer_connect_delay_ms")]
    pub peer_connect_delay_ms: u64,
    #[serde(default = "default_profile_latency_ms")]
    pub profile_latency_ms: u64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            primary_address: default_primary_address(),
            secondary_address: default_secondary_address(),
            override_failures: default_override_failures(),
            role_latency_ms: default_role_latency_ms(),
            peer_connect_delay_ms: default_peer_connect_delay_ms(),
            profile_latency_ms: default_profile_latency_ms(),
        }
    }
}

fn default_primary_address() -> BdAddr {
    BdAddr::new(0x0002, 0x5b, 0x00eb10)
}
fn default_secondary_address() -> BdAddr {
    BdAddr::new(0x0002, 0x5b, 0x00eb11)
}
fn default_override_failures() -> u32 {
    3
}
fn default_role_latency_ms() -> u64 {
    500
}
fn default_peer_connect_delay_ms() -> u64 {
    2000
}
fn default_profile_latency_ms() -> u64 {
    50
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_settings: LogSettings,
    #[serde(default)]
    pub topology: TopologySettings,
    #[serde(default)]
    pub simulation: SimulationSettings,
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::at(settings_path))
    }

    /// Load settings from an explicit path, falling back to defaults
    pub fn at(settings_path: PathBuf) -> Self {
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();

        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("TwsTopology");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }
}
