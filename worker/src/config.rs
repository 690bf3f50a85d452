use crate::args::Args;
use buildmaster_common::errors::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8221";
pub const DEFAULT_BUILD_TIMEOUT: u64 = 3600 * 24;
pub const DEFAULT_MAX_BYTES: usize = 1024 * 1024 * 1024;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    pub bind_addr: Option<String>,
    pub arch_tag: Option<String>,
    pub cache_dir: Option<PathBuf>,
    pub build_dir: Option<PathBuf>,
    pub backend: Option<PathBuf>,
    #[serde(default)]
    pub build: Build,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Build {
    pub timeout: Option<u64>,
    /// Limit for build logs, stored files and downloads.
    pub max_bytes: Option<usize>,
}

/// Settings after applying defaults and command line overrides.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub arch_tag: String,
    pub cache_dir: PathBuf,
    pub build_dir: PathBuf,
    pub backend: PathBuf,
    pub timeout: Duration,
    pub max_bytes: usize,
}

impl ConfigFile {
    pub fn resolve(self, args: &Args) -> Result<Config> {
        let arch_tag = args
            .arch_tag
            .clone()
            .or(self.arch_tag)
            .ok_or_else(|| anyhow!("No arch_tag configured"))?;
        let backend = args
            .backend
            .clone()
            .or(self.backend)
            .ok_or_else(|| anyhow!("No build backend configured"))?;

        Ok(Config {
            bind_addr: args
                .bind_addr
                .clone()
                .or(self.bind_addr)
                .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            arch_tag,
            cache_dir: self.cache_dir.unwrap_or_else(|| PathBuf::from("cache")),
            build_dir: self.build_dir.unwrap_or_else(|| PathBuf::from("build")),
            backend,
            timeout: Duration::from_secs(self.build.timeout.unwrap_or(DEFAULT_BUILD_TIMEOUT)),
            max_bytes: self.build.max_bytes.unwrap_or(DEFAULT_MAX_BYTES),
        })
    }
}

pub fn load(args: &Args) -> Result<ConfigFile> {
    let path = if let Some(path) = args.config.as_ref() {
        Some(path.to_owned())
    } else {
        let path = PathBuf::from("/etc/buildmaster-worker.conf");
        if path.exists() {
            Some(path)
        } else {
            None
        }
    };

    let conf = if let Some(path) = path {
        info!("Loading configuration from {:?}", path);
        let buf =
            fs::read_to_string(&path).with_context(|| anyhow!("Failed to open {:?}", path))?;
        toml::from_str::<ConfigFile>(&buf)?
    } else {
        info!("Using default configuration");
        ConfigFile::default()
    };

    Ok(conf)
}
