use crate::artifacts::{ArtifactStore, MIME_OCTET_STREAM};
use crate::models::{self, Artifact, NewArtifact};
use buildmaster_common::errors::*;
use buildmaster_common::{ArchHint, Pocket, SourceStatus};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Snapshot of the sources published into one series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesImport {
    pub series: String,
    pub sources: Vec<SourceImport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceImport {
    pub name: String,
    pub version: String,
    pub pocket: Pocket,
    #[serde(default = "default_component")]
    pub component: String,
    pub architecture_hint: String,
    pub status: Option<SourceStatus>,
    /// Paths of the source files, relative to the import file.
    #[serde(default)]
    pub files: Vec<PathBuf>,
}

fn default_component() -> String {
    "main".to_string()
}

type SourceKey = (String, String, Pocket);

fn key_for(name: &str, version: &str, pocket: Pocket) -> SourceKey {
    (name.to_string(), version.to_string(), pocket)
}

// all sources of the series that are currently active
// sources that are still part of the import get removed while syncing,
// whatever remains has vanished from the archive and gets superseded
pub struct CurrentSourceNamespace {
    sources: HashMap<SourceKey, models::SourcePackage>,
}

impl CurrentSourceNamespace {
    pub fn load_current_namespace_from_database(series: &str, connection: &mut SqliteConnection) -> Result<Self> {
        let mut sources = HashMap::new();
        for source in models::SourcePackage::find_published_sources(
            series,
            &[SourceStatus::Pending, SourceStatus::Published],
            connection,
        )? {
            let key = key_for(&source.name, &source.version, source.pocket);
            trace!("adding known source {:?} for series={:?}", key, series);
            sources.insert(key, source);
        }
        Ok(CurrentSourceNamespace { sources })
    }

    pub fn mark_still_present(&mut self, source: &SourceImport) -> Option<models::SourcePackage> {
        let key = key_for(&source.name, &source.version, source.pocket);
        self.sources.remove(&key)
    }
}

struct PreparedFile {
    filename: String,
    artifact: NewArtifact,
}

async fn prepare_files(store: &ArtifactStore, base: &Path, source: &SourceImport) -> Result<Vec<PreparedFile>> {
    let mut prepared = Vec::new();
    for path in &source.files {
        let path = base.join(path);
        let filename = path
            .file_name()
            .and_then(|f| f.to_str())
            .ok_or_else(|| anyhow!("Source file has no usable filename: {:?}", path))?
            .to_string();
        let content = fs::read(&path)
            .with_context(|| anyhow!("Failed to read source file: {:?}", path))?;
        let artifact = store.prepare(&filename, &content, MIME_OCTET_STREAM).await?;
        prepared.push(PreparedFile { filename, artifact });
    }
    Ok(prepared)
}

fn insert_source(
    series: &str,
    source: &SourceImport,
    files: Vec<PreparedFile>,
    connection: &mut SqliteConnection,
) -> Result<models::SourcePackage> {
    connection.transaction::<_, Error, _>(|connection| {
        let pkg = models::NewSourcePackage {
            name: source.name.clone(),
            version: source.version.clone(),
            series: series.to_string(),
            pocket: source.pocket,
            component: source.component.clone(),
            status: source.status.unwrap_or(SourceStatus::Published),
            architecture_hint: source.architecture_hint.clone(),
            published_at: chrono::Utc::now().naive_utc(),
        }
        .insert(connection)?;

        for file in files {
            let artifact_id = match Artifact::find_by_sha1(&file.artifact.sha1, connection)? {
                Some(existing) => existing.id,
                None => file.artifact.insert(connection)?,
            };
            models::NewSourceFile {
                source_package_id: pkg.id,
                filename: file.filename,
                sha1: file.artifact.sha1,
                artifact_id,
            }
            .insert(connection)?;
        }

        Ok(pkg)
    })
}

/// Bring the sources of a series in line with an import snapshot.
pub async fn run(
    import: SeriesImport,
    base: &Path,
    store: &ArtifactStore,
    connection: &mut SqliteConnection,
) -> Result<()> {
    let series = &import.series;

    info!("loading existing sources of {:?} from database...", series);
    let mut current = CurrentSourceNamespace::load_current_namespace_from_database(series, connection)?;
    info!("found existing sources: len={}", current.sources.len());

    let mut num_already_in_database = 0;
    let mut num_inserted = 0;
    for source in &import.sources {
        trace!("received source during import: {:?}", source);

        if ArchHint::parse(&source.architecture_hint).is_none() {
            warn!(
                "source {} {} has a malformed architecture list {:?}",
                source.name, source.version, source.architecture_hint
            );
        }

        let status = source.status.unwrap_or(SourceStatus::Published);
        if let Some(existing) = current.mark_still_present(source) {
            num_already_in_database += 1;
            if existing.status != status {
                debug!("updating status of {} {} to {}", source.name, source.version, status);
                models::SourcePackage::set_status(existing.id, status, connection)?;
            }
            continue;
        }

        if let Some(existing) = models::SourcePackage::get_by(&source.name, &source.version, series, source.pocket, connection)? {
            info!("source {} {} is published again", source.name, source.version);
            models::SourcePackage::set_status(existing.id, status, connection)?;
            continue;
        }

        let files = prepare_files(store, base, source).await?;
        let pkg = insert_source(series, source, files, connection)
            .with_context(|| anyhow!("Failed to insert source {} {}", source.name, source.version))?;
        debug!("inserted source {} {} as #{}", pkg.name, pkg.version, pkg.id);
        num_inserted += 1;
    }

    info!("found sources already in database: len={}", num_already_in_database);
    info!("inserted new sources: len={}", num_inserted);
    info!("found sources no longer present: len={}", current.sources.len());

    for (key, source) in current.sources {
        debug!("superseding vanished source {:?}", key);
        models::SourcePackage::set_status(source.id, SourceStatus::Superseded, connection)?;
    }

    info!("successfully synced import to database");
    Ok(())
}
