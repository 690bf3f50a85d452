use crate::artifacts::{ArtifactStore, MIME_BUILD_LOG, MIME_OCTET_STREAM};
use crate::models::{Build, Builder, Chroot, DistroArchSeries, NewArtifact, Queued, SourcePackage};
use crate::transitions;
use buildmaster_common::api::slave::{
    BuildOutcome, FileMap, HttpSlave, SlaveError, SlaveRpc, SlaveStatus, StartBuildRequest,
};
use buildmaster_common::config::LOG_TAIL_SIZE;
use buildmaster_common::errors::*;
use buildmaster_common::{utils, BuildStatus, Pocket};
use diesel::SqliteConnection;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const ECHO_TOKEN: &str = "buildmaster";
const BUILD_TYPE: &str = "binarypackage";

/// Creates the rpc handle for a registered builder.
pub trait SlaveConnector: Send + Sync {
    fn connect(&self, builder: &Builder) -> Result<Arc<dyn SlaveRpc>>;
}

pub struct HttpConnector {
    timeout: Duration,
}

impl HttpConnector {
    pub fn new(timeout: Duration) -> HttpConnector {
        HttpConnector { timeout }
    }
}

impl SlaveConnector for HttpConnector {
    fn connect(&self, builder: &Builder) -> Result<Arc<dyn SlaveRpc>> {
        let slave = HttpSlave::new(&builder.url, self.timeout)?;
        Ok(Arc::new(slave))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no chroot for {architecture} in pocket {pocket}")]
    MissingChroot { architecture: String, pocket: Pocket },
    #[error("builder {builder} belongs to processor family {builder_processor}, build needs {build_processor}")]
    ProcessorMismatch {
        builder: String,
        builder_processor: String,
        build_processor: String,
    },
    #[error("dispatch to {builder} failed")]
    Failed {
        builder: String,
        #[source]
        source: SlaveError,
    },
    #[error(transparent)]
    Database(#[from] Error),
}

/// Failure while sending work, before it is attributed to a builder.
#[derive(Debug, thiserror::Error)]
enum SendError {
    #[error(transparent)]
    Slave(#[from] SlaveError),
    #[error(transparent)]
    Database(#[from] Error),
}

struct Member {
    builder: Builder,
    slave: Arc<dyn SlaveRpc>,
}

/// The builders of one processor family.
pub struct BuilderPool {
    processor: String,
    members: Vec<Member>,
    connector: Arc<dyn SlaveConnector>,
    protocol_version: String,
}

/// Build cookie handed to a builder, ties a remote build to its queue item.
pub fn build_cookie(build: &Build, item: &Queued) -> String {
    format!("{}-{}", build.id, item.id)
}

async fn health_check(slave: Arc<dyn SlaveRpc>, protocol_version: &str, arch_tags: &[String]) -> std::result::Result<(), String> {
    let token = vec![ECHO_TOKEN.to_string()];
    let reply = slave.echo(&token).await.map_err(|err| err.to_string())?;
    if reply != token {
        return Err(format!("echo returned {:?}", reply));
    }

    let info = slave.info().await.map_err(|err| err.to_string())?;
    if info.protocol_version != protocol_version {
        return Err(format!(
            "protocol version mismatch: expected {:?}, got {:?}",
            protocol_version, info.protocol_version
        ));
    }
    if !arch_tags.contains(&info.arch_tag) {
        return Err(format!(
            "architecture tag mismatch: {:?} is not one of {:?}",
            info.arch_tag, arch_tags
        ));
    }

    Ok(())
}

impl BuilderPool {
    pub fn new(processor: String, connector: Arc<dyn SlaveConnector>, protocol_version: String) -> BuilderPool {
        BuilderPool {
            processor,
            members: Vec::new(),
            connector,
            protocol_version,
        }
    }

    pub fn processor(&self) -> &str {
        &self.processor
    }

    /// Reload the builders of this family and health-check the healthy ones.
    ///
    /// Builders are never removed from the registry here, failing ones only
    /// get marked unhealthy with the reason recorded.
    pub async fn refresh(&mut self, connection: &mut SqliteConnection, arch_tags: &[String]) -> Result<()> {
        self.load(connection)?;

        if arch_tags.is_empty() {
            warn!(
                "No architectures use processor family {:?}, skipping health checks",
                self.processor
            );
            return Ok(());
        }

        let checks = self
            .members
            .iter()
            .enumerate()
            .filter(|(_, member)| member.builder.ok)
            .map(|(idx, member)| {
                let slave = member.slave.clone();
                let protocol_version = self.protocol_version.as_str();
                async move { (idx, health_check(slave, protocol_version, arch_tags).await) }
            })
            .collect::<Vec<_>>();
        let results = futures::future::join_all(checks).await;

        for (idx, result) in results {
            if let Err(reason) = result {
                let member = &mut self.members[idx];
                warn!("Builder {:?} failed health check: {}", member.builder.name, reason);
                transitions::apply_builder_disabled(connection, &mut member.builder, &reason)?;
            } else {
                trace!("Builder {:?} passed health check", self.members[idx].builder.name);
            }
        }

        Ok(())
    }

    fn load(&mut self, connection: &mut SqliteConnection) -> Result<()> {
        let mut existing = self
            .members
            .drain(..)
            .map(|m| (m.builder.id, m))
            .collect::<HashMap<_, _>>();

        for mut builder in Builder::list_processor(&self.processor, connection)? {
            let slave = match existing.remove(&builder.id) {
                Some(member) if member.builder.url == builder.url => member.slave,
                _ => match self.connector.connect(&builder) {
                    Ok(slave) => slave,
                    Err(err) => {
                        let reason = format!("{:#}", err);
                        error!("Failed to set up builder {:?}: {}", builder.name, reason);
                        if builder.ok {
                            transitions::apply_builder_disabled(connection, &mut builder, &reason)?;
                        }
                        continue;
                    }
                },
            };
            self.members.push(Member { builder, slave });
        }

        Ok(())
    }

    /// Builders whose health flag is set.
    pub fn usable(&self) -> Vec<&Builder> {
        self.members
            .iter()
            .map(|m| &m.builder)
            .filter(|b| b.ok)
            .collect()
    }

    pub fn is_healthy(&self) -> bool {
        self.members.iter().any(|m| m.builder.ok)
    }

    fn member(&self, builder_id: i32) -> Option<&Member> {
        self.members.iter().find(|m| m.builder.id == builder_id)
    }

    fn member_mut(&mut self, builder_id: i32) -> Option<&mut Member> {
        self.members.iter_mut().find(|m| m.builder.id == builder_id)
    }

    /// First usable builder that reports IDLE right now.
    ///
    /// A builder that fails this check is skipped for now but not disabled,
    /// only failed health checks do that.
    pub async fn first_available(&self, connection: &mut SqliteConnection) -> Result<Option<Builder>> {
        for member in &self.members {
            let builder = &member.builder;
            if !builder.ok || builder.manual {
                continue;
            }
            if Queued::builder_is_busy(builder.id, connection)? {
                continue;
            }

            match member.slave.status().await {
                Ok(SlaveStatus::Idle) => return Ok(Some(builder.clone())),
                Ok(status) => trace!("Builder {:?} is not idle: {:?}", builder.name, status),
                Err(err) => info!("Builder {:?} is temporarily unavailable: {}", builder.name, err),
            }
        }
        Ok(None)
    }

    pub fn mark_failed(&mut self, connection: &mut SqliteConnection, builder_id: i32, reason: &str) -> Result<()> {
        let Some(member) = self.member_mut(builder_id) else {
            let mut builder = Builder::get_id(builder_id, connection)?;
            return transitions::apply_builder_disabled(connection, &mut builder, reason);
        };
        warn!("Disabling builder {:?}: {}", member.builder.name, reason);
        transitions::apply_builder_disabled(connection, &mut member.builder, reason)
    }

    async fn transfer(
        slave: &dyn SlaveRpc,
        connection: &mut SqliteConnection,
        store: &ArtifactStore,
        sha1: &str,
        artifact_id: i32,
    ) -> std::result::Result<(), SendError> {
        let url = store.url(artifact_id);
        if slave.have_file(sha1, url.as_deref()).await? {
            trace!("Builder already has {}", sha1);
            return Ok(());
        }

        let content = store.get(connection, artifact_id).await?;
        debug!("Sending {} bytes ({}) to builder", content.len(), sha1);
        slave.store_file_verified(content, sha1).await?;
        Ok(())
    }

    async fn send_build(
        slave: &dyn SlaveRpc,
        connection: &mut SqliteConnection,
        store: &ArtifactStore,
        chroot: &Chroot,
        source: &SourcePackage,
        cookie: String,
    ) -> std::result::Result<(), SendError> {
        Self::transfer(slave, connection, store, &chroot.sha1, chroot.artifact_id).await?;

        let mut files = FileMap::new();
        for file in source.files(connection)? {
            Self::transfer(slave, connection, store, &file.sha1, file.artifact_id).await?;
            files.insert(file.filename, file.sha1);
        }

        let request = StartBuildRequest {
            build_cookie: cookie,
            files,
            chroot_sha1: chroot.sha1.clone(),
            build_type: BUILD_TYPE.to_string(),
        };
        slave.start_build(&request).await?;
        Ok(())
    }

    /// Send a queue item to a builder and record the assignment.
    pub async fn dispatch(
        &mut self,
        connection: &mut SqliteConnection,
        store: &ArtifactStore,
        builder: &Builder,
        item: &Queued,
        build: &Build,
    ) -> std::result::Result<(), DispatchError> {
        if builder.processor != build.processor || builder.processor != self.processor {
            return Err(DispatchError::ProcessorMismatch {
                builder: builder.name.clone(),
                builder_processor: builder.processor.clone(),
                build_processor: build.processor.clone(),
            });
        }

        let source = SourcePackage::get_id(build.source_package_id, connection)?;
        let das = DistroArchSeries::get_id(build.distro_arch_series_id, connection)?;
        let chroot = Chroot::find(das.id, source.pocket, connection)?.ok_or_else(|| {
            DispatchError::MissingChroot {
                architecture: format!("{}/{}", das.series, das.architecture),
                pocket: source.pocket,
            }
        })?;

        let slave = self
            .member(builder.id)
            .map(|m| m.slave.clone())
            .ok_or_else(|| anyhow!("Builder {:?} is not part of pool {:?}", builder.name, self.processor))?;

        let cookie = build_cookie(build, item);
        info!(
            "Dispatching {} {} ({}) to {:?} as {}",
            source.name, source.version, das.architecture, builder.name, cookie
        );

        match Self::send_build(slave.as_ref(), connection, store, &chroot, &source, cookie).await {
            Ok(()) => (),
            Err(SendError::Slave(source)) => {
                self.mark_failed(connection, builder.id, &format!("dispatch failed: {}", source))?;
                return Err(DispatchError::Failed {
                    builder: builder.name.clone(),
                    source,
                });
            }
            Err(SendError::Database(err)) => return Err(DispatchError::Database(err)),
        }

        let now = chrono::Utc::now().naive_utc();
        transitions::apply_dispatch(connection, item, build, builder, now)?;
        Ok(())
    }

    /// Fetch a file and check it hashes to the sha1 the builder reported.
    async fn fetch_verified(slave: &dyn SlaveRpc, sha1: &str) -> std::result::Result<Vec<u8>, SlaveError> {
        let content = slave.fetch_file(sha1).await?;
        let actual = utils::sha1_hex(&content);
        if actual != sha1 {
            return Err(SlaveError::TransferIntegrity {
                expected: sha1.to_string(),
                actual,
            });
        }
        Ok(content)
    }

    async fn fetch_log(slave: &dyn SlaveRpc, build_log: Option<&str>) -> std::result::Result<Vec<u8>, SlaveError> {
        match build_log {
            Some(sha1) => Self::fetch_verified(slave, sha1).await,
            None => slave.fetch_log_tail().await,
        }
    }

    async fn prepare_log(store: &ArtifactStore, build: &Build, log: &[u8]) -> Result<NewArtifact> {
        let name = format!("buildlog_{}.txt", build.id);
        store.prepare(&name, log, MIME_BUILD_LOG).await
    }

    async fn clean(slave: &dyn SlaveRpc, builder: &Builder) {
        if let Err(err) = slave.clean().await {
            warn!("Failed to clean builder {:?}: {}", builder.name, err);
        }
    }

    /// Ask the builder holding `item` how it is doing and advance the build.
    ///
    /// Builder faults are turned into transitions or health changes, only
    /// database errors are returned.
    pub async fn poll(
        &mut self,
        connection: &mut SqliteConnection,
        store: &ArtifactStore,
        item: &Queued,
        build: &Build,
    ) -> Result<()> {
        let Some(builder_id) = item.builder_id else {
            return Ok(());
        };

        let Some(member) = self.member(builder_id) else {
            warn!("Queue item #{} is held by a builder outside of pool {:?}, requeueing", item.id, self.processor);
            return transitions::apply_requeue(connection, item);
        };
        let slave = member.slave.clone();
        let builder = member.builder.clone();

        if !builder.ok {
            info!("Builder {:?} is disabled, requeueing #{}", builder.name, item.id);
            return transitions::apply_requeue(connection, item);
        }

        let status = match slave.status().await {
            Ok(status) => status,
            Err(err @ SlaveError::Unreachable(_)) => {
                info!("Failed to poll builder {:?}, retrying later: {}", builder.name, err);
                return Ok(());
            }
            Err(err) => {
                error!("Builder {:?} sent a bad status for #{}: {}", builder.name, build.id, err);
                return self.builder_failure(connection, builder_id, build, &format!("bad status: {}", err));
            }
        };

        let expected = build_cookie(build, item);
        let cookie = match &status {
            SlaveStatus::Building { build_cookie }
            | SlaveStatus::Waiting { build_cookie, .. }
            | SlaveStatus::Aborted { build_cookie } => Some(build_cookie.as_str()),
            SlaveStatus::Idle | SlaveStatus::Unknown(_) => None,
        };
        if let Some(cookie) = cookie {
            if cookie != expected {
                let reason = format!("builder reports build {:?}, expected {:?}", cookie, expected);
                self.mark_failed(connection, builder_id, &reason)?;
                return Ok(());
            }
        }

        match status {
            SlaveStatus::Idle => {
                warn!("Builder {:?} is idle but should be building {}, requeueing", builder.name, expected);
                transitions::apply_requeue(connection, item)?;
            }
            SlaveStatus::Building { .. } => match slave.fetch_log_tail().await {
                Ok(log) => {
                    let tail = utils::tail(&log, LOG_TAIL_SIZE);
                    transitions::apply_log_tail(connection, item, tail)?;
                }
                Err(err) => debug!("Failed to fetch log tail from {:?}: {}", builder.name, err),
            },
            SlaveStatus::Aborted { .. } => {
                info!("Build {} was aborted on {:?}", expected, builder.name);
                transitions::apply_requeue(connection, item)?;
                Self::clean(slave.as_ref(), &builder).await;
            }
            SlaveStatus::Waiting {
                outcome,
                files,
                dependencies,
                build_log,
                ..
            } => {
                self.handle_waiting(
                    connection,
                    store,
                    slave.as_ref(),
                    &builder,
                    item,
                    build,
                    outcome,
                    files,
                    dependencies,
                    build_log,
                )
                .await?;
            }
            SlaveStatus::Unknown(state) => {
                error!("Builder {:?} reports unknown state {:?}", builder.name, state);
                self.mark_failed(connection, builder_id, &format!("unknown builder state {:?}", state))?;
            }
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_waiting(
        &mut self,
        connection: &mut SqliteConnection,
        store: &ArtifactStore,
        slave: &dyn SlaveRpc,
        builder: &Builder,
        item: &Queued,
        build: &Build,
        outcome: BuildOutcome,
        files: FileMap,
        dependencies: Option<String>,
        build_log: Option<String>,
    ) -> Result<()> {
        let now = chrono::Utc::now().naive_utc();

        match outcome {
            BuildOutcome::Ok => {
                let log = match Self::fetch_log(slave, build_log.as_deref()).await {
                    Ok(log) => log,
                    Err(err @ SlaveError::Unreachable(_)) => {
                        warn!("Failed to fetch build log from {:?}, retrying later: {}", builder.name, err);
                        return Ok(());
                    }
                    Err(err) => {
                        let reason = format!("failed to collect build log: {}", err);
                        return self.builder_failure(connection, builder.id, build, &reason);
                    }
                };

                let mut artifacts = Vec::new();
                for (filename, sha1) in files {
                    let content = match Self::fetch_verified(slave, &sha1).await {
                        Ok(content) => content,
                        Err(err @ SlaveError::Unreachable(_)) => {
                            warn!("Failed to fetch {:?} from {:?}, retrying later: {}", filename, builder.name, err);
                            return Ok(());
                        }
                        Err(err) => {
                            let reason = format!("failed to collect {:?}: {}", filename, err);
                            return self.builder_failure(connection, builder.id, build, &reason);
                        }
                    };
                    let artifact = store.prepare(&filename, &content, MIME_OCTET_STREAM).await?;
                    artifacts.push((filename, artifact));
                }

                let log = Self::prepare_log(store, build, &log).await?;
                info!("Build #{} succeeded on {:?} with {} file(s)", build.id, builder.name, artifacts.len());
                transitions::apply_success(connection, item, build, Some(log), artifacts, now)?;
                Self::clean(slave, builder).await;
            }
            BuildOutcome::PackageFail => {
                let log = match Self::fetch_log(slave, build_log.as_deref()).await {
                    Ok(log) => Some(Self::prepare_log(store, build, &log).await?),
                    Err(err) => {
                        warn!("Failed to fetch build log of #{} from {:?}: {}", build.id, builder.name, err);
                        None
                    }
                };
                info!("Build #{} failed to build on {:?}", build.id, builder.name);
                transitions::apply_package_failure(connection, item, build, log, now)?;
                Self::clean(slave, builder).await;
            }
            BuildOutcome::DepFail => {
                if transitions::apply_operator_wait(connection, build, BuildStatus::ManualDepWait, dependencies)? {
                    info!("Build #{} is waiting for dependencies on {:?}", build.id, builder.name);
                }
            }
            BuildOutcome::ChrootFail => {
                if transitions::apply_operator_wait(connection, build, BuildStatus::ChrootWait, None)? {
                    info!("Build #{} is waiting for a chroot fix on {:?}", build.id, builder.name);
                }
            }
            BuildOutcome::BuilderFail => {
                self.builder_failure(connection, builder.id, build, "builder failed while building")?;
            }
            BuildOutcome::GivenBack => {
                info!("Builder {:?} gave back build #{}", builder.name, build.id);
                transitions::apply_given_back(connection, item, build)?;
                Self::clean(slave, builder).await;
            }
            BuildOutcome::Unknown(code) => {
                error!("Builder {:?} reports unknown build status {:?} for #{}", builder.name, code, build.id);
                self.builder_failure(connection, builder.id, build, &format!("unknown build status {:?}", code))?;
            }
        }

        Ok(())
    }

    fn builder_failure(&mut self, connection: &mut SqliteConnection, builder_id: i32, build: &Build, reason: &str) -> Result<()> {
        let Some(member) = self.member_mut(builder_id) else {
            bail!("Builder #{} is not part of pool", builder_id);
        };
        warn!("Disabling builder {:?}: {}", member.builder.name, reason);
        transitions::apply_builder_failure(connection, &mut member.builder, build, reason)
    }
}
