use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::net::lifecycle::{DebouncePolicy, RetryPolicy};
use crate::viz::render::LodSettings;
use crate::viz::sim::ForceParams;
use crate::viz::viewport::{DEFAULT_MAX_SCALE, DEFAULT_MIN_SCALE};

// Engine tuning persisted between runs. Unknown/missing fields fall back to
// defaults so old settings files keep loading across upgrades.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default)]
    pub forces: ForceParams,
    #[serde(default)]
    pub lod: LodSettings,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub debounce: DebouncePolicy,
    #[serde(default = "EngineSettings::default_min_scale")]
    pub min_scale: f32,
    #[serde(default = "EngineSettings::default_max_scale")]
    pub max_scale: f32,
    // How many hops out a discovery request asks the backend for.
    #[serde(default = "EngineSettings::default_discovery_depth")]
    pub discovery_depth: u32,
    // Hop bound for path enumeration between two selected resources.
    #[serde(default = "EngineSettings::default_path_max_depth")]
    pub path_max_depth: u32,
    // If None, snapshots go to the OS-default state directory.
    #[serde(default)]
    pub snapshot_override: Option<PathBuf>,
    // If None, exports land in the OS temp directory.
    #[serde(default)]
    pub export_override: Option<PathBuf>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            forces: ForceParams::default(),
            lod: LodSettings::default(),
            retry: RetryPolicy::default(),
            debounce: DebouncePolicy::default(),
            min_scale: Self::default_min_scale(),
            max_scale: Self::default_max_scale(),
            discovery_depth: Self::default_discovery_depth(),
            path_max_depth: Self::default_path_max_depth(),
            snapshot_override: None,
            export_override: None,
        }
    }
}

impl EngineSettings {
    fn default_min_scale() -> f32 {
        DEFAULT_MIN_SCALE
    }
    fn default_max_scale() -> f32 {
        DEFAULT_MAX_SCALE
    }
    fn default_discovery_depth() -> u32 {
        2
    }
    fn default_path_max_depth() -> u32 {
        5
    }

    fn config_dir() -> PathBuf {
        // Cross-platform user config dir
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("~"));
            return home.join("Library").join("Application Support").join("FHIRScope");
        }
        #[cfg(target_os = "windows")]
        {
            if let Ok(appdata) = std::env::var("APPDATA") {
                return PathBuf::from(appdata).join("FHIRScope");
            }
            return PathBuf::from("FHIRScope");
        }
        #[cfg(all(unix, not(target_os = "macos")))]
        {
            if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
                return PathBuf::from(xdg).join("fhirscope");
            }
            let home = std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("~"));
            return home.join(".config").join("fhirscope");
        }
    }

    fn snapshot_default_dir() -> PathBuf {
        #[cfg(target_os = "macos")]
        {
            let tmp = std::env::var_os("TMPDIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/tmp"));
            return tmp.join("FHIRScope");
        }
        #[cfg(target_os = "windows")]
        {
            if let Ok(local) = std::env::var("LOCALAPPDATA") {
                return PathBuf::from(local).join("FHIRScope").join("Snapshots");
            }
            if let Ok(temp) = std::env::var("TEMP") {
                return PathBuf::from(temp).join("FHIRScope");
            }
            return PathBuf::from("FHIRScope");
        }
        #[cfg(all(unix, not(target_os = "macos")))]
        {
            if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
                return PathBuf::from(xdg).join("fhirscope");
            }
            if let Ok(home) = std::env::var("HOME") {
                return PathBuf::from(home).join(".local").join("state").join("fhirscope");
            }
            return PathBuf::from("/tmp").join("FHIRScope");
        }
    }

    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_dir().join("settings.json");
        if path.exists() {
            let mut f = std::fs::File::open(path)?;
            let mut s = String::new();
            f.read_to_string(&mut s)?;
            let v: Self = serde_json::from_str(&s)?;
            return Ok(v);
        }
        Ok(Self::default())
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let dir = Self::config_dir();
        fs::create_dir_all(&dir)?;
        let path = dir.join("settings.json");
        let s = serde_json::to_string_pretty(self)?;
        let mut f = std::fs::File::create(path)?;
        f.write_all(s.as_bytes())?;
        Ok(())
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        if let Some(p) = &self.snapshot_override {
            return p.clone();
        }
        Self::snapshot_default_dir()
    }

    /// Default export directory when no override is set: OS temporary directory.
    pub fn export_default_dir() -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push("FHIRScope");
        p.push("exports");
        p
    }

    /// Effective export directory honoring user override or falling back to OS temp.
    pub fn export_dir(&self) -> PathBuf {
        if let Some(p) = &self.export_override {
            return p.clone();
        }
        Self::export_default_dir()
    }
}
