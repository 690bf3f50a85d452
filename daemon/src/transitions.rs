//! State transitions of builds, queue items and builders.
//!
//! Every function here commits exactly one transition in its own
//! transaction, so a crash between two of them never leaves a half applied
//! state behind. None of them talk to a builder.

use crate::models::{Build, Builder, NewArtifact, NewBinaryFile, Queued};
use buildmaster_common::errors::*;
use buildmaster_common::BuildStatus;
use chrono::NaiveDateTime;
use diesel::prelude::*;

fn duration_since(started: Option<NaiveDateTime>, now: NaiveDateTime) -> Option<i32> {
    let started = started?;
    let secs = (now - started).num_seconds().max(0);
    Some(i32::try_from(secs).unwrap_or(i32::MAX))
}

/// Record that `builder` started working on a queue item.
pub fn apply_dispatch(
    connection: &mut SqliteConnection,
    item: &Queued,
    build: &Build,
    builder: &Builder,
    now: NaiveDateTime,
) -> Result<()> {
    connection.transaction::<_, Error, _>(|connection| {
        let mut item = item.clone();
        item.assign(builder.id, now, connection)?;

        let mut build = build.clone();
        build.builder_id = Some(builder.id);
        build.build_started = Some(now);
        build.update(connection)?;
        Ok(())
    })
}

/// Copy the remote log tail onto the queue item.
pub fn apply_log_tail(connection: &mut SqliteConnection, item: &Queued, tail: &[u8]) -> Result<()> {
    Queued::set_log_tail(item.id, tail, connection)
}

/// Put a queue item back into the dispatch pool, the build is not touched.
pub fn apply_requeue(connection: &mut SqliteConnection, item: &Queued) -> Result<()> {
    connection.transaction::<_, Error, _>(|connection| {
        let mut item = item.clone();
        item.reset(connection)?;
        Build::clear_assignment(item.build_id, connection)
    })
}

/// A successful build: store the log and every produced file, then retire the queue item.
pub fn apply_success(
    connection: &mut SqliteConnection,
    item: &Queued,
    build: &Build,
    log: Option<NewArtifact>,
    files: Vec<(String, NewArtifact)>,
    now: NaiveDateTime,
) -> Result<()> {
    connection.transaction::<_, Error, _>(|connection| {
        let mut build = build.clone();

        if let Some(log) = log {
            build.build_log_id = Some(log.insert(connection)?);
        }

        for (filename, artifact) in files {
            let artifact_id = artifact.insert(connection)?;
            NewBinaryFile {
                build_id: build.id,
                filename,
                sha1: artifact.sha1,
                artifact_id,
            }
            .insert(connection)?;
        }

        build.status = BuildStatus::FullyBuilt;
        build.build_duration = duration_since(item.build_started, now);
        build.dependencies = None;
        build.update(connection)?;

        Queued::delete_queue_item(item.id, connection)?;
        Ok(())
    })
}

/// The package failed to build, this is final for this version.
pub fn apply_package_failure(
    connection: &mut SqliteConnection,
    item: &Queued,
    build: &Build,
    log: Option<NewArtifact>,
    now: NaiveDateTime,
) -> Result<()> {
    connection.transaction::<_, Error, _>(|connection| {
        let mut build = build.clone();

        if let Some(log) = log {
            build.build_log_id = Some(log.insert(connection)?);
        }

        build.status = BuildStatus::FailedToBuild;
        build.build_duration = duration_since(item.build_started, now);
        build.update(connection)?;

        Queued::delete_queue_item(item.id, connection)?;
        Ok(())
    })
}

/// DEPFAIL and CHROOTFAIL: the build waits for an operator, the builder stays pinned.
///
/// Returns `false` if the build was already waiting with the same dependencies.
pub fn apply_operator_wait(
    connection: &mut SqliteConnection,
    build: &Build,
    status: BuildStatus,
    dependencies: Option<String>,
) -> Result<bool> {
    if build.status == status && build.dependencies == dependencies {
        return Ok(false);
    }

    connection.transaction::<_, Error, _>(|connection| {
        let mut build = build.clone();
        build.status = status;
        build.dependencies = dependencies;
        build.update(connection)?;
        Ok(true)
    })
}

/// Disable a builder and release every queue item it holds.
pub fn apply_builder_disabled(connection: &mut SqliteConnection, builder: &mut Builder, reason: &str) -> Result<()> {
    connection.transaction::<_, Error, _>(|connection| {
        builder.mark_failed(reason, connection)?;
        Build::clear_assignments_of(builder.id, connection)?;
        let n = Queued::reset_for_builder(builder.id, connection)?;
        if n > 0 {
            debug!("Released {} queue item(s) held by {:?}", n, builder.name);
        }
        Ok(())
    })
}

/// The builder environment broke while building, the build goes back to the pool.
pub fn apply_builder_failure(
    connection: &mut SqliteConnection,
    builder: &mut Builder,
    build: &Build,
    reason: &str,
) -> Result<()> {
    connection.transaction::<_, Error, _>(|connection| {
        builder.mark_failed(reason, connection)?;
        Build::clear_assignments_of(builder.id, connection)?;
        Queued::reset_for_builder(builder.id, connection)?;

        let mut build = build.clone();
        build.status = BuildStatus::NeedsBuild;
        build.builder_id = None;
        build.build_started = None;
        build.dependencies = None;
        build.update(connection)?;
        Ok(())
    })
}

/// The builder gave the job back without being at fault.
pub fn apply_given_back(connection: &mut SqliteConnection, item: &Queued, build: &Build) -> Result<()> {
    connection.transaction::<_, Error, _>(|connection| {
        let mut item = item.clone();
        item.reset(connection)?;

        let mut build = build.clone();
        build.status = BuildStatus::NeedsBuild;
        build.builder_id = None;
        build.build_started = None;
        build.update(connection)?;
        Ok(())
    })
}

/// A build that can never be dispatched, its source has no files.
///
/// The build fails so no new queue item is created for it, an operator
/// can retry it once the source is fixed.
pub fn apply_unbuildable(connection: &mut SqliteConnection, item: &Queued, build: &Build) -> Result<()> {
    connection.transaction::<_, Error, _>(|connection| {
        Queued::delete_queue_item(item.id, connection)?;

        let mut build = build.clone();
        build.status = BuildStatus::FailedToBuild;
        build.builder_id = None;
        build.build_started = None;
        build.update(connection)?;
        Ok(())
    })
}

/// Retire a build whose source is no longer published.
pub fn apply_supersede(connection: &mut SqliteConnection, build: &Build) -> Result<()> {
    connection.transaction::<_, Error, _>(|connection| {
        if let Some(item) = Queued::find_queue_item(build.id, connection)? {
            Queued::delete_queue_item(item.id, connection)?;
        }

        let mut build = build.clone();
        build.status = BuildStatus::Superseded;
        build.update(connection)?;
        Ok(())
    })
}

/// Operator retry of a failed or waiting build.
pub fn apply_retry(connection: &mut SqliteConnection, build: &Build) -> Result<()> {
    connection.transaction::<_, Error, _>(|connection| {
        if let Some(mut item) = Queued::find_queue_item(build.id, connection)? {
            item.reset(connection)?;
        }

        let mut build = build.clone();
        build.status = BuildStatus::NeedsBuild;
        build.builder_id = None;
        build.build_started = None;
        build.dependencies = None;
        build.update(connection)?;
        Ok(())
    })
}
