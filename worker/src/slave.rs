use crate::cache::FileCache;
use crate::config::Config;
use crate::proc::{self, SharedLog};
use buildmaster_common::api::slave::{
    BuildOutcome, FileMap, SlaveStatus, StartBuildRequest, StatusResponse,
};
use buildmaster_common::config::LOG_TAIL_SIZE;
use buildmaster_common::errors::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::fs;

/// Why a request was refused, these are the caller's fault.
#[derive(Debug, thiserror::Error)]
pub enum Refusal {
    #[error("builder is busy: {0}")]
    Busy(&'static str),
    #[error("file is not in the cache: {0}")]
    MissingFile(String),
    #[error("invalid filename: {0:?}")]
    InvalidFilename(String),
}

/// Map the exit code of the build backend to a build outcome.
pub fn outcome_for_exit(code: i32) -> BuildOutcome {
    match code {
        0 => BuildOutcome::Ok,
        1 => BuildOutcome::PackageFail,
        2 => BuildOutcome::DepFail,
        3 => BuildOutcome::ChrootFail,
        4 => BuildOutcome::GivenBack,
        _ => BuildOutcome::BuilderFail,
    }
}

fn valid_filename(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('.') && !name.contains('/') && !name.contains('\0')
}

pub struct Slave {
    config: Config,
    cache: FileCache,
    build_dir: PathBuf,
    state: Mutex<SlaveStatus>,
    log: SharedLog,
}

impl Slave {
    pub async fn new(config: Config) -> Result<Slave> {
        let cache = FileCache::open(&config.cache_dir).await?;
        fs::create_dir_all(&config.build_dir)
            .await
            .with_context(|| anyhow!("Failed to create build directory: {:?}", config.build_dir))?;
        let build_dir = fs::canonicalize(&config.build_dir).await?;
        Ok(Slave {
            config,
            cache,
            build_dir,
            state: Mutex::new(SlaveStatus::Idle),
            log: SharedLog::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &FileCache {
        &self.cache
    }

    fn state(&self) -> MutexGuard<'_, SlaveStatus> {
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn set_state(&self, status: SlaveStatus) {
        *self.state() = status;
    }

    pub fn status(&self) -> StatusResponse {
        StatusResponse::from(self.state().clone())
    }

    pub fn log_tail(&self) -> Vec<u8> {
        self.log.tail(LOG_TAIL_SIZE)
    }

    /// Validate a build request and start it in the background.
    pub async fn start_build(self: &Arc<Self>, request: StartBuildRequest) -> Result<std::result::Result<(), Refusal>> {
        for (name, sha1) in &request.files {
            if !valid_filename(name) {
                return Ok(Err(Refusal::InvalidFilename(name.clone())));
            }
            if !self.cache.has(sha1).await.unwrap_or(false) {
                return Ok(Err(Refusal::MissingFile(sha1.clone())));
            }
        }
        if !self.cache.has(&request.chroot_sha1).await.unwrap_or(false) {
            return Ok(Err(Refusal::MissingFile(request.chroot_sha1.clone())));
        }

        {
            let mut state = self.state();
            if !state.is_idle() {
                return Ok(Err(Refusal::Busy("not idle")));
            }
            *state = SlaveStatus::Building {
                build_cookie: request.build_cookie.clone(),
            };
        }

        info!("Starting build {:?}", request.build_cookie);
        self.log.clear();

        let slave = self.clone();
        tokio::spawn(async move {
            let cookie = request.build_cookie.clone();
            let status = match slave.execute(&request).await {
                Ok(status) => status,
                Err(err) => {
                    error!("Build {:?} failed on our side: {:#}", cookie, err);
                    slave.log.extend(format!("\n\nbuildmaster-worker: {:#}\n", err).as_bytes());
                    SlaveStatus::Waiting {
                        build_cookie: cookie,
                        outcome: BuildOutcome::BuilderFail,
                        files: FileMap::new(),
                        dependencies: None,
                        build_log: slave.cache.store(&slave.log.snapshot()).await.ok(),
                    }
                }
            };
            slave.set_state(status);
        });

        Ok(Ok(()))
    }

    async fn prepare(&self, request: &StartBuildRequest) -> Result<(PathBuf, PathBuf)> {
        if fs::try_exists(&self.build_dir).await? {
            fs::remove_dir_all(&self.build_dir).await?;
        }
        let src = self.build_dir.join("src");
        let out = self.build_dir.join("out");
        fs::create_dir_all(&src).await?;
        fs::create_dir_all(&out).await?;

        for (name, sha1) in &request.files {
            let from = self.cache.path(sha1)?;
            fs::copy(&from, src.join(name))
                .await
                .with_context(|| anyhow!("Failed to copy {:?} into build directory", name))?;
        }

        Ok((src, out))
    }

    async fn collect(&self, out: &Path) -> Result<FileMap> {
        let mut files = FileMap::new();
        let mut entries = fs::read_dir(out).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(String::from) else {
                warn!("Skipping output file with non-utf8 name: {:?}", entry.path());
                continue;
            };
            let content = fs::read(entry.path()).await?;
            if content.len() > self.config.max_bytes {
                bail!("Output file {:?} exceeds size limit", name);
            }
            let sha1 = self.cache.store(&content).await?;
            files.insert(name, sha1);
        }
        Ok(files)
    }

    async fn execute(&self, request: &StartBuildRequest) -> Result<SlaveStatus> {
        let (src, out) = self.prepare(request).await?;

        let mut envs = HashMap::new();
        envs.insert("BUILDMASTER_BUILD_COOKIE".to_string(), request.build_cookie.clone());
        envs.insert("BUILDMASTER_BUILD_TYPE".to_string(), request.build_type.clone());
        envs.insert("BUILDMASTER_ARCH_TAG".to_string(), self.config.arch_tag.clone());
        envs.insert(
            "BUILDMASTER_CHROOT".to_string(),
            self.cache.path(&request.chroot_sha1)?.to_string_lossy().into_owned(),
        );
        envs.insert("BUILDMASTER_SOURCE_DIR".to_string(), src.to_string_lossy().into_owned());
        envs.insert("BUILDMASTER_OUTPUT_DIR".to_string(), out.to_string_lossy().into_owned());

        let opts = proc::Options {
            timeout: self.config.timeout,
            size_limit: Some(self.config.max_bytes),
            kill_at_size_limit: false,
            current_dir: Some(self.build_dir.clone()),
            envs,
        };
        let code = proc::run(&self.config.backend, [&request.build_type], opts, self.log.clone()).await?;
        let build_log = Some(self.cache.store(&self.log.snapshot()).await?);

        let Some(code) = code else {
            info!("Build {:?} was terminated by a signal", request.build_cookie);
            return Ok(SlaveStatus::Aborted {
                build_cookie: request.build_cookie.clone(),
            });
        };

        let outcome = outcome_for_exit(code);
        info!("Build {:?} finished with {}", request.build_cookie, outcome);

        let files = if outcome == BuildOutcome::Ok {
            self.collect(&out).await?
        } else {
            FileMap::new()
        };

        let dependencies = if outcome == BuildOutcome::DepFail {
            match fs::read_to_string(self.build_dir.join("dependencies")).await {
                Ok(deps) => Some(deps.trim().to_string()).filter(|d| !d.is_empty()),
                Err(_) => None,
            }
        } else {
            None
        };

        Ok(SlaveStatus::Waiting {
            build_cookie: request.build_cookie.clone(),
            outcome,
            files,
            dependencies,
            build_log,
        })
    }

    /// Forget a finished build so the builder is IDLE again.
    pub async fn clean(&self) -> Result<std::result::Result<(), Refusal>> {
        if matches!(*self.state(), SlaveStatus::Building { .. }) {
            return Ok(Err(Refusal::Busy("a build is running")));
        }

        if fs::try_exists(&self.build_dir).await? {
            fs::remove_dir_all(&self.build_dir).await?;
        }
        fs::create_dir_all(&self.build_dir).await?;

        self.log.clear();
        self.set_state(SlaveStatus::Idle);
        debug!("Builder is clean");
        Ok(Ok(()))
    }
}
