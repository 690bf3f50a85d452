use crate::api::PROTOCOL_VERSION;
use crate::errors::*;
use crate::Pocket;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_TICK_INTERVAL: u64 = 15;
pub const DEFAULT_SLAVE_TIMEOUT: u64 = 30;
pub const API_ERROR_DELAY: u64 = 30;

/// How many bytes of the remote log are kept on a queue item.
pub const LOG_TAIL_SIZE: usize = 2048;

pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<ConfigFile> {
    let mut config = ConfigFile::default();

    if let Some(c) = load_from("/etc/buildmaster.conf")? {
        config.update(c);
    }

    if let Ok(path) = config_path() {
        if let Some(c) = load_from(path)? {
            config.update(c);
        }
    }

    if let Some(path) = path {
        let c = load_from(path)?
            .ok_or_else(|| format_err!("Failed to read config file"))?;
        config.update(c);
    }

    Ok(config)
}

fn config_path() -> Result<PathBuf> {
    let config_dir = dirs_next::config_dir()
        .ok_or_else(|| format_err!("Failed to find config dir"))?;
    Ok(config_dir.join("buildmaster.conf"))
}

fn load_from<P: AsRef<Path>>(path: P) -> Result<Option<ConfigFile>> {
    if let Ok(buf) = fs::read_to_string(path.as_ref()) {
        debug!("loading config file {:?}", path.as_ref());
        let config = toml::from_str(&buf)
            .context("Failed to load config")?;
        Ok(Some(config))
    } else {
        Ok(None)
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub slave: SlaveConfig,
    #[serde(default)]
    pub series: BTreeMap<String, SeriesConfig>,
    #[serde(default)]
    pub builders: BTreeMap<String, BuilderConfig>,
}

impl ConfigFile {
    pub fn update(&mut self, c: ConfigFile) {
        self.schedule.update(c.schedule);
        self.slave.update(c.slave);
        for (k, v) in c.series {
            if let Some(o) = self.series.get_mut(&k) {
                o.update(v);
            } else {
                self.series.insert(k, v);
            }
        }
        for (k, v) in c.builders {
            self.builders.insert(k, v);
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreKind {
    #[default]
    Flat,
    Age,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    interval: Option<u64>,
    #[serde(default)]
    pub series: Vec<String>,
    pub architectures: Option<Vec<String>>,
    pub pockets: Option<Vec<Pocket>>,
    pub score: Option<ScoreKind>,
}

impl ScheduleConfig {
    pub fn update(&mut self, c: ScheduleConfig) {
        if c.interval.is_some() {
            self.interval = c.interval;
        }
        if !c.series.is_empty() {
            self.series = c.series;
        }
        if c.architectures.is_some() {
            self.architectures = c.architectures;
        }
        if c.pockets.is_some() {
            self.pockets = c.pockets;
        }
        if c.score.is_some() {
            self.score = c.score;
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval.unwrap_or(DEFAULT_TICK_INTERVAL))
    }

    pub fn score(&self) -> ScoreKind {
        self.score.unwrap_or_default()
    }

    /// Architectures this instance services, `None` meaning all of them.
    pub fn services(&self, arch: &str) -> bool {
        self.architectures
            .as_ref()
            .map(|archs| archs.iter().any(|a| a == arch))
            .unwrap_or(true)
    }

    pub fn permits(&self, pocket: Pocket) -> bool {
        self.pockets
            .as_ref()
            .map(|pockets| pockets.contains(&pocket))
            .unwrap_or(true)
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct SlaveConfig {
    timeout: Option<u64>,
    protocol_version: Option<String>,
    pub artifact_url: Option<String>,
}

impl SlaveConfig {
    pub fn update(&mut self, c: SlaveConfig) {
        if c.timeout.is_some() {
            self.timeout = c.timeout;
        }
        if c.protocol_version.is_some() {
            self.protocol_version = c.protocol_version;
        }
        if c.artifact_url.is_some() {
            self.artifact_url = c.artifact_url;
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.unwrap_or(DEFAULT_SLAVE_TIMEOUT))
    }

    pub fn protocol_version(&self) -> &str {
        self.protocol_version.as_deref().unwrap_or(PROTOCOL_VERSION)
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct SeriesConfig {
    /// Maps an architecture tag to the processor family building it.
    #[serde(default)]
    pub architectures: BTreeMap<String, String>,
}

impl SeriesConfig {
    pub fn update(&mut self, c: SeriesConfig) {
        for (k, v) in c.architectures {
            self.architectures.insert(k, v);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuilderConfig {
    pub url: String,
    pub processor: String,
    #[serde(default)]
    pub manual: bool,
}
