use crate::artifacts::{ArtifactStore, MIME_OCTET_STREAM};
use crate::models::{Artifact, Build, Builder, DistroArchSeries, NewChroot, Queued};
use crate::pool::SlaveConnector;
use crate::transitions;
use buildmaster_common::errors::*;
use buildmaster_common::Pocket;
use diesel::SqliteConnection;
use std::path::Path;

/// Store a chroot tarball and make it the build environment of an architecture and pocket.
pub async fn import_chroot(
    connection: &mut SqliteConnection,
    store: &ArtifactStore,
    series: &str,
    architecture: &str,
    pocket: Pocket,
    path: &Path,
) -> Result<i32> {
    let das = DistroArchSeries::get_by(series, architecture, connection)?
        .ok_or_else(|| anyhow!("Unknown architecture {}/{}, is it configured?", series, architecture))?;

    let content = tokio::fs::read(path)
        .await
        .with_context(|| anyhow!("Failed to read chroot: {:?}", path))?;
    let name = path
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or("chroot.tar.gz");

    let artifact_id = store
        .put(connection, name, content.len() as u64, &content[..], MIME_OCTET_STREAM)
        .await?;
    let artifact = Artifact::get_id(artifact_id, connection)?;

    let chroot = NewChroot {
        distro_arch_series_id: das.id,
        pocket,
        sha1: artifact.sha1,
        artifact_id,
    }
    .upsert(connection)?;
    info!(
        "Chroot for {}/{} {} is now {} (#{})",
        series, architecture, pocket, chroot.sha1, chroot.id
    );
    Ok(chroot.id)
}

/// Re-enable a builder after an operator fixed it.
pub fn reset_builder(connection: &mut SqliteConnection, name: &str) -> Result<()> {
    let mut builder = Builder::get_by_name(name, connection)?
        .ok_or_else(|| anyhow!("No builder named {:?}", name))?;
    if builder.ok {
        info!("Builder {:?} is already enabled", name);
        return Ok(());
    }
    if let Some(note) = &builder.failure_note {
        info!("Re-enabling builder {:?}, it was disabled for: {}", name, note);
    }
    builder.reset(connection)
}

/// Send a failed or waiting build back to NEEDSBUILD.
///
/// A builder still pinned to the build is cleaned first.
pub async fn retry_build(
    connection: &mut SqliteConnection,
    connector: &dyn SlaveConnector,
    build_id: i32,
) -> Result<()> {
    let build = Build::get_id(build_id, connection)?;
    if !build.status.is_retryable() {
        bail!("Build #{} is {} and can't be retried", build.id, build.status);
    }

    if let Some(item) = Queued::find_queue_item(build.id, connection)? {
        if let Some(builder_id) = item.builder_id {
            let builder = Builder::get_id(builder_id, connection)?;
            let slave = connector.connect(&builder)?;
            slave
                .clean()
                .await
                .with_context(|| anyhow!("Failed to clean builder {:?}", builder.name))?;
            debug!("Cleaned builder {:?}", builder.name);
        }
    }

    transitions::apply_retry(connection, &build)?;
    info!("Build #{} was {}, it's queued again", build.id, build.status);
    Ok(())
}
