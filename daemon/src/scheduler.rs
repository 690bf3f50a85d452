use crate::artifacts::ArtifactStore;
use crate::models::{Build, Builder, DistroArchSeries, NewBuild, NewQueued, Queued, SourcePackage};
use crate::pool::{BuilderPool, DispatchError, HttpConnector, SlaveConnector};
use crate::score::{self, Candidate, ScorePolicy};
use crate::transitions;
use buildmaster_common::config::ConfigFile;
use buildmaster_common::errors::*;
use buildmaster_common::{ArchHint, SourceStatus};
use diesel::SqliteConnection;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

/// Where an architecture independent source gets built.
///
/// These are built once and published for every architecture, the first
/// servicing architecture of the series is used.
pub fn pick_arch_indep_target(archs: &[DistroArchSeries]) -> Option<&DistroArchSeries> {
    archs.iter().min_by_key(|das| das.id)
}

/// Registry of builder pools, keyed by processor family.
pub struct BuilderPools {
    pools: BTreeMap<String, BuilderPool>,
    connector: Arc<dyn SlaveConnector>,
    protocol_version: String,
}

impl BuilderPools {
    pub fn new(connector: Arc<dyn SlaveConnector>, protocol_version: String) -> BuilderPools {
        BuilderPools {
            pools: BTreeMap::new(),
            connector,
            protocol_version,
        }
    }

    /// Health-check every processor family against the architectures it builds.
    pub async fn refresh(&mut self, connection: &mut SqliteConnection, archs: &[DistroArchSeries]) -> Result<()> {
        let mut tags = BTreeMap::<String, BTreeSet<String>>::new();
        for das in archs {
            tags.entry(das.processor.clone())
                .or_default()
                .insert(das.architecture.clone());
        }

        for processor in Builder::list_processors(connection)? {
            tags.entry(processor).or_default();
        }

        for (processor, arch_tags) in tags {
            let arch_tags = arch_tags.into_iter().collect::<Vec<_>>();
            let pool = self.pools.entry(processor.clone()).or_insert_with(|| {
                BuilderPool::new(processor, self.connector.clone(), self.protocol_version.clone())
            });
            pool.refresh(connection, &arch_tags).await?;
        }

        Ok(())
    }

    pub fn get(&self, processor: &str) -> Option<&BuilderPool> {
        self.pools.get(processor)
    }

    pub fn get_mut(&mut self, processor: &str) -> Option<&mut BuilderPool> {
        self.pools.get_mut(processor)
    }

    pub fn is_healthy(&self, processor: &str) -> bool {
        self.pools.get(processor).is_some_and(|pool| pool.is_healthy())
    }
}

pub struct Scheduler {
    config: ConfigFile,
    pools: BuilderPools,
    score: Box<dyn ScorePolicy>,
    store: ArtifactStore,
}

impl Scheduler {
    pub fn new(config: ConfigFile, connector: Arc<dyn SlaveConnector>) -> Scheduler {
        let pools = BuilderPools::new(connector, config.slave.protocol_version().to_string());
        let score = score::policy(config.schedule.score());
        let store = ArtifactStore::new(config.slave.artifact_url.clone());
        Scheduler {
            config,
            pools,
            score,
            store,
        }
    }

    pub fn from_config(config: ConfigFile) -> Scheduler {
        let connector = Arc::new(HttpConnector::new(config.slave.timeout()));
        Scheduler::new(config, connector)
    }

    pub fn with_score(mut self, score: Box<dyn ScorePolicy>) -> Scheduler {
        self.score = score;
        self
    }

    pub fn pools(&self) -> &BuilderPools {
        &self.pools
    }

    pub fn pools_mut(&mut self) -> &mut BuilderPools {
        &mut self.pools
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Enabled architectures of the configured series this instance services.
    pub fn serviced_architectures(&self, connection: &mut SqliteConnection) -> Result<Vec<DistroArchSeries>> {
        let schedule = &self.config.schedule;
        let archs = DistroArchSeries::list(connection)?
            .into_iter()
            .filter(|das| schedule.series.contains(&das.series))
            .filter(|das| schedule.services(&das.architecture))
            .collect();
        Ok(archs)
    }

    fn serviced_arch_ids(&self, connection: &mut SqliteConnection) -> Result<Vec<i32>> {
        let ids = self
            .serviced_architectures(connection)?
            .into_iter()
            .map(|das| das.id)
            .collect();
        Ok(ids)
    }

    pub async fn refresh_pools(&mut self, connection: &mut SqliteConnection) -> Result<()> {
        let archs = self.serviced_architectures(connection)?;
        self.pools.refresh(connection, &archs).await
    }

    /// Retire unassigned builds of sources that are no longer published.
    pub fn supersede_stale_builds(&self, connection: &mut SqliteConnection) -> Result<usize> {
        let stale = Build::list_stale(connection)?;
        for build in &stale {
            info!("Superseding build #{}, its source is no longer published", build.id);
            transitions::apply_supersede(connection, build)?;
        }
        Ok(stale.len())
    }

    /// Make sure every published source of `series` has its builds.
    ///
    /// Only architectures with a healthy builder pool are considered. This is
    /// idempotent, existing live builds are never duplicated.
    pub fn create_missing_builds(&self, connection: &mut SqliteConnection, series: &str) -> Result<usize> {
        let archs = DistroArchSeries::list_series(series, connection)?
            .into_iter()
            .filter(|das| self.config.schedule.services(&das.architecture))
            .filter(|das| self.pools.is_healthy(&das.processor))
            .collect::<Vec<_>>();

        if archs.is_empty() {
            debug!("No architecture of {:?} can be built right now", series);
            return Ok(0);
        }

        let sources = SourcePackage::find_published_sources(
            series,
            &[SourceStatus::Pending, SourceStatus::Published],
            connection,
        )?;

        let mut created = 0;
        for source in sources {
            if !self.config.schedule.permits(source.pocket) {
                trace!("Pocket {} is not built, skipping {} {}", source.pocket, source.name, source.version);
                continue;
            }

            let Some(hint) = ArchHint::parse(&source.architecture_hint) else {
                error!(
                    "Source {} {} in {:?} has a malformed architecture list {:?}, skipping",
                    source.name, source.version, series, source.architecture_hint
                );
                continue;
            };

            let targets = match hint {
                ArchHint::All => {
                    if !Build::find_in_series(source.id, connection)?.is_empty() {
                        continue;
                    }
                    pick_arch_indep_target(&archs).into_iter().collect::<Vec<_>>()
                }
                hint => archs
                    .iter()
                    .filter(|das| hint.wants(&das.architecture))
                    .collect(),
            };

            for das in targets {
                if Build::find_build(source.id, das.id, connection)?.is_some() {
                    continue;
                }
                let build = NewBuild::new(source.id, das.id, das.processor.clone()).insert(connection)?;
                info!(
                    "Created build #{} for {} {} on {}/{}",
                    build.id, source.name, source.version, das.series, das.architecture
                );
                created += 1;
            }
        }

        Ok(created)
    }

    /// Give every NEEDSBUILD build without one a queue item.
    pub fn create_missing_build_queue_entries(&self, connection: &mut SqliteConnection) -> Result<usize> {
        let arch_ids = self.serviced_arch_ids(connection)?;
        let builds = Build::list_needing_queue(&arch_ids, connection)?;
        for build in &builds {
            let item = NewQueued::new(build.id).insert(connection)?;
            debug!("Queued build #{} as #{}", build.id, item.id);
        }
        Ok(builds.len())
    }

    /// Unassigned queue items of serviced architectures whose build still needs building.
    pub fn calculate_candidates(&self, connection: &mut SqliteConnection) -> Result<Vec<(Queued, Build)>> {
        let arch_ids = self.serviced_arch_ids(connection)?;
        Queued::find_candidates(&arch_ids, connection)
    }

    /// Drop candidates that can never build, score and sort the rest.
    pub fn sanitise_and_score_candidates(&self, connection: &mut SqliteConnection) -> Result<Vec<Candidate>> {
        let now = chrono::Utc::now().naive_utc();
        let mut candidates = Vec::new();

        for (queue, build) in self.calculate_candidates(connection)? {
            let source = SourcePackage::get_id(build.source_package_id, connection)?;

            if SourcePackage::count_files(source.id, connection)? == 0 {
                error!(
                    "Source {} {} has no files, failing build #{} and dropping queue item #{}",
                    source.name, source.version, build.id, queue.id
                );
                transitions::apply_unbuildable(connection, &queue, &build)?;
                continue;
            }

            if !self.config.schedule.permits(source.pocket) {
                continue;
            }

            let mut candidate = Candidate {
                queue,
                build,
                pocket: source.pocket,
                score: 0,
            };
            candidate.score = self.score.score(&candidate, now);
            if candidate.queue.score != Some(candidate.score) {
                Queued::set_score(candidate.queue.id, candidate.score, connection)?;
                candidate.queue.score = Some(candidate.score);
            }
            candidates.push(candidate);
        }

        score::sort_candidates(&mut candidates);
        Ok(candidates)
    }

    /// Hand out candidates to idle builders of one processor family.
    ///
    /// `candidates` must be sorted, the best one is dispatched first.
    pub async fn dispatch_by_processor_family(
        &mut self,
        connection: &mut SqliteConnection,
        processor: &str,
        candidates: Vec<Candidate>,
    ) -> Result<usize> {
        let Some(pool) = self.pools.get_mut(processor) else {
            debug!("No builders for processor family {:?}", processor);
            return Ok(0);
        };

        let mut queue = VecDeque::from(candidates);
        let mut dispatched = 0;

        while !queue.is_empty() {
            let Some(builder) = pool.first_available(connection).await? else {
                debug!("No idle builder left for {:?}, {} candidate(s) wait", processor, queue.len());
                break;
            };
            let Some(candidate) = queue.pop_front() else {
                break;
            };

            match pool
                .dispatch(connection, &self.store, &builder, &candidate.queue, &candidate.build)
                .await
            {
                Ok(()) => dispatched += 1,
                Err(DispatchError::Failed { builder, source }) => {
                    warn!("Dispatch of build #{} to {:?} failed: {}", candidate.build.id, builder, source);
                    queue.push_front(candidate);
                }
                Err(err @ DispatchError::MissingChroot { .. }) => {
                    warn!("Can't dispatch build #{}: {}", candidate.build.id, err);
                }
                Err(err @ DispatchError::ProcessorMismatch { .. }) => {
                    error!("Refusing to dispatch build #{}: {}", candidate.build.id, err);
                }
                Err(DispatchError::Database(err)) => return Err(err),
            }
        }

        Ok(dispatched)
    }

    /// Poll every builder that holds a queue item.
    pub async fn scan_active_builders(&mut self, connection: &mut SqliteConnection) -> Result<()> {
        let arch_ids = self.serviced_arch_ids(connection)?;
        for (item, build) in Queued::find_live_queue_items(&arch_ids, connection)? {
            if let Some(pool) = self.pools.get_mut(&build.processor) {
                pool.poll(connection, &self.store, &item, &build).await?;
            } else {
                warn!("No pool for processor family {:?}, requeueing #{}", build.processor, item.id);
                transitions::apply_requeue(connection, &item)?;
            }
        }
        Ok(())
    }

    /// One round of scheduling, safe to call repeatedly.
    pub async fn tick(&mut self, connection: &mut SqliteConnection) -> Result<()> {
        self.refresh_pools(connection).await?;
        self.supersede_stale_builds(connection)?;

        for series in self.config.schedule.series.clone() {
            self.create_missing_builds(connection, &series)?;
        }
        self.create_missing_build_queue_entries(connection)?;

        self.scan_active_builders(connection).await?;

        let mut by_processor = BTreeMap::<String, Vec<Candidate>>::new();
        for candidate in self.sanitise_and_score_candidates(connection)? {
            by_processor
                .entry(candidate.build.processor.clone())
                .or_default()
                .push(candidate);
        }

        for (processor, candidates) in by_processor {
            let n = self.dispatch_by_processor_family(connection, &processor, candidates).await?;
            if n > 0 {
                info!("Dispatched {} build(s) to {:?}", n, processor);
            }
        }

        Ok(())
    }
}
