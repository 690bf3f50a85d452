#![cfg(test)]

use crate::assertions::*;
use crate::data::*;
use crate::fixtures::*;
use crate::setup::*;
use buildmaster::artifacts::ArtifactStore;
use buildmaster::ops;
use buildmaster::pool::{build_cookie, DispatchError};
use buildmaster::scheduler::pick_arch_indep_target;
use buildmaster_common::api::slave::{BuildOutcome, SlaveStatus};
use buildmaster_common::api::PROTOCOL_VERSION;
use buildmaster_common::config::{ScoreKind, LOG_TAIL_SIZE};
use buildmaster_common::{utils, BuildStatus, Pocket};
use rstest::rstest;

mod assertions;
mod data;
pub mod setup;

#[rstest]
#[case(1)]
#[case(2)]
#[case(5)]
#[tokio::test]
pub async fn arch_indep_source_gets_exactly_one_build(#[case] num_archs: usize) {
    let mut h = Harness::new(config_file(&ARCHITECTURES[..num_archs]));
    setup_single_source(&mut h, "all").await;

    assert_eq!(h.create_missing_builds(), 1);
    assert_eq!(h.create_missing_builds(), 0);

    let builds = h.builds();
    assert_eq!(builds.len(), 1);

    let archs = h.architectures();
    assert_eq!(archs.len(), num_archs);
    let target = pick_arch_indep_target(&archs).unwrap();
    assert_eq!(builds[0].distro_arch_series_id, target.id);
}

#[rstest]
#[tokio::test]
pub async fn explicit_architecture_list_builds_the_intersection() {
    let mut h = Harness::new(config_file(&["amd64", "i386", "armhf"]));
    setup_single_source(&mut h, "amd64 armhf riscv64").await;

    assert_eq!(h.create_missing_builds(), 2);
    assert_eq!(h.create_missing_builds(), 0);

    let builds = h.builds();
    let mut archs = builds
        .iter()
        .map(|build| h.architecture(build.distro_arch_series_id).architecture)
        .collect::<Vec<_>>();
    archs.sort();
    assert_eq!(archs, ["amd64", "armhf"]);
}

#[rstest]
#[tokio::test]
pub async fn any_source_is_built_on_every_architecture() {
    let mut h = Harness::new(config_file(&ARCHITECTURES[..2]));
    setup_single_source(&mut h, "any").await;

    assert_eq!(h.create_missing_builds(), 2);
    assert_eq!(h.create_missing_builds(), 0);
    assert_eq!(h.builds().len(), 2);
}

#[rstest]
#[tokio::test]
pub async fn malformed_architecture_list_is_skipped(mut single_arch: Harness) {
    let h = &mut single_arch;
    setup_single_source(h, "").await;

    assert_eq!(h.create_missing_builds(), 0);
    assert!(h.builds().is_empty());
}

#[rstest]
#[tokio::test]
pub async fn architectures_without_healthy_builders_get_no_builds() {
    let mut h = Harness::new(config_file(&["amd64", "armhf"]));
    h.slave("armhf").set_reachable(false);
    setup_single_source(&mut h, "any").await;

    assert_eq!(h.create_missing_builds(), 1);
    let builds = h.builds();
    assert_eq!(h.architecture(builds[0].distro_arch_series_id).architecture, "amd64");
}

#[rstest]
#[tokio::test]
pub async fn pockets_outside_the_schedule_are_not_built() {
    let mut config = config_file(&["amd64"]);
    config.schedule.pockets = Some(vec![Pocket::Release, Pocket::Security]);
    let mut h = Harness::new(config);

    import_sources(&mut h, vec![source_in_pocket(DUMMY_SOURCE, Pocket::Proposed)]).await;
    h.refresh_pools().await;

    assert_eq!(h.create_missing_builds(), 0);
}

#[rstest]
#[tokio::test]
pub async fn builder_failing_protocol_check_is_never_available(mut single_arch: Harness) {
    let h = &mut single_arch;
    h.slave("amd64").set_protocol_version("0.9");
    h.refresh_pools().await;

    let builder = h.builder("amd64");
    assert!(!builder.ok);
    assert!(builder.failure_note.unwrap().contains("protocol version"));

    let pool = h.scheduler.pools().get("amd64").unwrap();
    assert!(pool.usable().is_empty());
    assert!(pool.first_available(&mut h.connection).await.unwrap().is_none());

    // a fixed builder stays disabled until an operator resets it
    h.slave("amd64").set_protocol_version(PROTOCOL_VERSION);
    h.refresh_pools().await;
    let pool = h.scheduler.pools().get("amd64").unwrap();
    assert!(pool.first_available(&mut h.connection).await.unwrap().is_none());

    ops::reset_builder(&mut h.connection, &builder_name("amd64")).unwrap();
    h.refresh_pools().await;
    let pool = h.scheduler.pools().get("amd64").unwrap();
    let available = pool.first_available(&mut h.connection).await.unwrap();
    assert_eq!(available.map(|b| b.name), Some(builder_name("amd64")));
}

#[rstest]
#[tokio::test]
pub async fn unreachable_builder_fails_refresh(mut single_arch: Harness) {
    let h = &mut single_arch;
    h.slave("amd64").set_reachable(false);
    h.refresh_pools().await;

    let builder = h.builder("amd64");
    assert!(!builder.ok);
    assert!(!h.scheduler.pools().is_healthy("amd64"));
}

#[rstest]
#[tokio::test]
pub async fn dispatch_stays_within_processor_family(mut two_families: Harness) {
    let h = &mut two_families;
    import_sources(h, vec![source(DUMMY_SOURCE, "any")]).await;
    import_chroots(h).await;
    h.tick().await;

    assert_eq!(h.builds().len(), 3);
    assert_eq!(h.slave("amd64").started().len(), 1);
    assert_eq!(h.slave("arm").started().len(), 1);
    assert_dispatch_within_family(h);

    let (item, build) = h
        .scheduler
        .calculate_candidates(&mut h.connection)
        .unwrap()
        .pop()
        .unwrap();
    assert_eq!(build.processor, "amd64");

    let arm = h.builder("arm");
    let store = ArtifactStore::new(None);
    let pool = h.scheduler.pools_mut().get_mut("arm").unwrap();
    let err = pool
        .dispatch(&mut h.connection, &store, &arm, &item, &build)
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::ProcessorMismatch { .. }));
    assert_eq!(h.queue_item(build.id).unwrap().builder_id, None);
}

#[rstest]
#[tokio::test]
pub async fn queue_items_stay_unique_across_ticks(mut two_families: Harness) {
    let h = &mut two_families;
    import_sources(h, vec![source(DUMMY_SOURCE, "any")]).await;
    import_chroots(h).await;

    for _ in 0..3 {
        h.tick().await;
        assert_queue_is_unique(h);
    }
    assert_eq!(h.queue().len(), 3);

    h.slave("amd64")
        .finish(BuildOutcome::Ok, &[("hello_2.10-3_amd64.deb", DUMMY_BINARY)], None);
    h.tick().await;
    assert_queue_is_unique(h);
    assert_eq!(h.queue().len(), 2);
    assert_eq!(h.slave("amd64").started().len(), 2);

    let created = h
        .scheduler
        .create_missing_build_queue_entries(&mut h.connection)
        .unwrap();
    assert_eq!(created, 0);
    assert_dispatch_within_family(h);
}

#[rstest]
#[tokio::test]
pub async fn building_then_ok_collects_every_file(mut single_arch: Harness) {
    let h = &mut single_arch;
    let build_id = setup_single_dispatched_build(h).await;
    let slave = h.slave("amd64");

    slave.append_log(b"dpkg-buildpackage: info: source package hello\n");
    h.scan().await;
    let item = h.queue_item(build_id).unwrap();
    assert_eq!(
        item.log_tail.as_deref(),
        Some(&b"dpkg-buildpackage: info: source package hello\n"[..])
    );
    assert_eq!(h.build(build_id).status, BuildStatus::NeedsBuild);

    slave.finish(
        BuildOutcome::Ok,
        &[
            ("hello_2.10-3_amd64.deb", DUMMY_BINARY),
            ("hello_2.10-3_amd64.buildinfo", DUMMY_OTHER_BINARY),
        ],
        None,
    );
    h.scan().await;

    let build = h.build(build_id);
    assert_eq!(build.status, BuildStatus::FullyBuilt);
    assert!(build.build_log_id.is_some());
    assert!(build.build_duration.is_some());

    let files = h.binary_files(&build);
    assert_eq!(files.len(), 2);
    for file in &files {
        let content = h
            .scheduler
            .store()
            .get(&mut h.connection, file.artifact_id)
            .await
            .unwrap();
        assert_eq!(utils::sha1_hex(&content), file.sha1);
    }

    assert!(h.queue_item(build_id).is_none());
    assert_eq!(slave.cleaned(), 1);
}

#[rstest]
#[tokio::test]
pub async fn log_tail_is_truncated(mut single_arch: Harness) {
    let h = &mut single_arch;
    let build_id = setup_single_dispatched_build(h).await;

    h.slave("amd64").append_log(&vec![b'x'; LOG_TAIL_SIZE * 3]);
    h.scan().await;

    let item = h.queue_item(build_id).unwrap();
    assert_eq!(item.log_tail.map(|tail| tail.len()), Some(LOG_TAIL_SIZE));
}

#[rstest]
#[tokio::test]
pub async fn depfail_keeps_the_builder_pinned(mut single_arch: Harness) {
    let h = &mut single_arch;
    let build_id = setup_single_dispatched_build(h).await;
    let slave = h.slave("amd64");

    slave.finish(BuildOutcome::DepFail, &[], Some(DUMMY_DEPENDENCIES));
    h.tick().await;

    assert_still_pinned(h, build_id, "amd64", BuildStatus::ManualDepWait);
    assert_eq!(h.build(build_id).dependencies.as_deref(), Some(DUMMY_DEPENDENCIES));
    assert_eq!(slave.cleaned(), 0);

    h.tick().await;
    assert_still_pinned(h, build_id, "amd64", BuildStatus::ManualDepWait);
    assert_eq!(slave.started().len(), 1);
}

#[rstest]
#[tokio::test]
pub async fn chrootfail_keeps_the_builder_pinned(mut single_arch: Harness) {
    let h = &mut single_arch;
    let build_id = setup_single_dispatched_build(h).await;
    let slave = h.slave("amd64");

    slave.finish(BuildOutcome::ChrootFail, &[], None);
    h.tick().await;

    assert_still_pinned(h, build_id, "amd64", BuildStatus::ChrootWait);
    assert_eq!(slave.cleaned(), 0);
}

#[rstest]
#[tokio::test]
pub async fn retry_releases_a_waiting_build(mut single_arch: Harness) {
    let h = &mut single_arch;
    let build_id = setup_single_dispatched_build(h).await;
    let slave = h.slave("amd64");

    slave.finish(BuildOutcome::DepFail, &[], Some(DUMMY_DEPENDENCIES));
    h.tick().await;

    ops::retry_build(&mut h.connection, h.connector.as_ref(), build_id)
        .await
        .unwrap();
    assert_eq!(slave.cleaned(), 1);
    assert_back_in_pool(h, build_id);
    assert_eq!(h.build(build_id).dependencies, None);

    h.tick().await;
    assert_eq!(slave.started().len(), 2);
}

#[rstest]
#[tokio::test]
pub async fn retry_refuses_builds_in_progress(mut single_arch: Harness) {
    let h = &mut single_arch;
    let build_id = setup_single_dispatched_build(h).await;

    let result = ops::retry_build(&mut h.connection, h.connector.as_ref(), build_id).await;
    assert!(result.is_err());
}

#[rstest]
#[tokio::test]
pub async fn builderfail_disables_the_builder(mut single_arch: Harness) {
    let h = &mut single_arch;
    let build_id = setup_single_dispatched_build(h).await;

    h.slave("amd64").finish(BuildOutcome::BuilderFail, &[], None);
    h.tick().await;

    let builder = h.builder("amd64");
    assert!(!builder.ok);
    assert!(builder.failure_note.is_some());
    assert_back_in_pool(h, build_id);
}

#[rstest]
#[tokio::test]
pub async fn unknown_outcome_is_a_builder_failure(mut single_arch: Harness) {
    let h = &mut single_arch;
    let build_id = setup_single_dispatched_build(h).await;

    h.slave("amd64")
        .finish(BuildOutcome::Unknown("MELTED".to_string()), &[], None);
    h.scan().await;

    assert!(!h.builder("amd64").ok);
    assert_back_in_pool(h, build_id);
}

#[rstest]
#[tokio::test]
pub async fn unknown_builder_state_disables_the_builder(mut single_arch: Harness) {
    let h = &mut single_arch;
    let build_id = setup_single_dispatched_build(h).await;

    h.slave("amd64")
        .set_status(SlaveStatus::Unknown("ON_FIRE".to_string()));
    h.scan().await;

    assert!(!h.builder("amd64").ok);
    assert_back_in_pool(h, build_id);
}

#[rstest]
#[tokio::test]
pub async fn packagefail_is_final(mut single_arch: Harness) {
    let h = &mut single_arch;
    let build_id = setup_single_dispatched_build(h).await;
    let slave = h.slave("amd64");

    slave.append_log(b"error: missing semicolon\n");
    slave.finish(BuildOutcome::PackageFail, &[], None);
    h.tick().await;

    let build = h.build(build_id);
    assert_eq!(build.status, BuildStatus::FailedToBuild);
    assert!(build.build_log_id.is_some());
    assert!(h.queue_item(build_id).is_none());
    assert_eq!(slave.cleaned(), 1);
    assert!(h.builder("amd64").ok);

    h.tick().await;
    assert_eq!(h.builds().len(), 1);
    assert_eq!(slave.started().len(), 1);
}

#[rstest]
#[tokio::test]
pub async fn givenback_requeues_without_blame(mut single_arch: Harness) {
    let h = &mut single_arch;
    let build_id = setup_single_dispatched_build(h).await;
    let slave = h.slave("amd64");

    slave.finish(BuildOutcome::GivenBack, &[], None);
    h.scan().await;

    assert!(h.builder("amd64").ok);
    assert_back_in_pool(h, build_id);
    assert_eq!(slave.cleaned(), 1);
}

#[rstest]
#[tokio::test]
pub async fn idle_builder_releases_its_item(mut single_arch: Harness) {
    let h = &mut single_arch;
    let build_id = setup_single_dispatched_build(h).await;

    h.slave("amd64").set_status(SlaveStatus::Idle);
    h.scan().await;

    assert!(h.builder("amd64").ok);
    assert_back_in_pool(h, build_id);
}

#[rstest]
#[tokio::test]
pub async fn aborted_build_is_requeued(mut single_arch: Harness) {
    let h = &mut single_arch;
    let build_id = setup_single_dispatched_build(h).await;
    let slave = h.slave("amd64");

    let build_cookie = slave.cookie().unwrap();
    slave.set_status(SlaveStatus::Aborted { build_cookie });
    h.scan().await;

    assert_back_in_pool(h, build_id);
    assert_eq!(slave.cleaned(), 1);
}

#[rstest]
#[tokio::test]
pub async fn unreachable_builder_keeps_its_item(mut single_arch: Harness) {
    let h = &mut single_arch;
    let build_id = setup_single_dispatched_build(h).await;

    h.slave("amd64").set_reachable(false);
    h.scan().await;

    assert!(h.builder("amd64").ok);
    let item = h.queue_item(build_id).unwrap();
    assert_eq!(item.builder_id, Some(h.builder("amd64").id));
}

#[rstest]
#[tokio::test]
pub async fn unparseable_status_disables_the_builder(mut single_arch: Harness) {
    let h = &mut single_arch;
    let build_id = setup_single_dispatched_build(h).await;
    assert!(h.build(build_id).builder_id.is_some());

    h.slave("amd64").garble_status();
    h.scan().await;

    let builder = h.builder("amd64");
    assert!(!builder.ok);
    assert!(builder.failure_note.unwrap().contains("bad status"));
    assert_back_in_pool(h, build_id);
}

#[rstest]
#[tokio::test]
pub async fn missing_result_file_disables_the_builder(mut single_arch: Harness) {
    let h = &mut single_arch;
    let build_id = setup_single_dispatched_build(h).await;
    let slave = h.slave("amd64");

    slave.finish(BuildOutcome::Ok, &[("hello_2.10-3_amd64.deb", DUMMY_BINARY)], None);
    slave.lose_files();
    h.scan().await;

    let builder = h.builder("amd64");
    assert!(!builder.ok);
    assert!(builder.failure_note.unwrap().contains("hello_2.10-3_amd64.deb"));
    assert_back_in_pool(h, build_id);
    assert!(h.build(build_id).build_log_id.is_none());
}

#[rstest]
#[tokio::test]
pub async fn corrupted_result_file_disables_the_builder(mut single_arch: Harness) {
    let h = &mut single_arch;
    let build_id = setup_single_dispatched_build(h).await;
    let slave = h.slave("amd64");

    slave.finish(BuildOutcome::Ok, &[("hello_2.10-3_amd64.deb", DUMMY_BINARY)], None);
    slave.corrupt_downloads();
    h.scan().await;

    assert!(!h.builder("amd64").ok);
    assert_back_in_pool(h, build_id);
    assert_eq!(slave.cleaned(), 0);
}

#[rstest]
#[tokio::test]
pub async fn unreachable_builder_keeps_a_finished_build(mut single_arch: Harness) {
    let h = &mut single_arch;
    let build_id = setup_single_dispatched_build(h).await;
    let slave = h.slave("amd64");

    slave.finish(BuildOutcome::Ok, &[("hello_2.10-3_amd64.deb", DUMMY_BINARY)], None);
    slave.set_reachable(false);
    h.scan().await;

    assert!(h.builder("amd64").ok);
    assert_still_pinned(h, build_id, "amd64", BuildStatus::NeedsBuild);

    slave.set_reachable(true);
    h.scan().await;
    assert_eq!(h.build(build_id).status, BuildStatus::FullyBuilt);
}

#[rstest]
#[tokio::test]
pub async fn foreign_build_cookie_disables_the_builder(mut single_arch: Harness) {
    let h = &mut single_arch;
    let build_id = setup_single_dispatched_build(h).await;

    h.slave("amd64").set_status(SlaveStatus::Building {
        build_cookie: "999-999".to_string(),
    });
    h.scan().await;

    assert!(!h.builder("amd64").ok);
    assert_back_in_pool(h, build_id);
}

#[rstest]
#[tokio::test]
pub async fn missing_chroot_leaves_the_candidate_queued(mut single_arch: Harness) {
    let h = &mut single_arch;
    import_sources(h, vec![source(DUMMY_SOURCE, "any")]).await;
    h.tick().await;

    let builds = h.builds();
    assert_eq!(builds.len(), 1);
    assert!(h.slave("amd64").started().is_empty());
    assert!(h.builder("amd64").ok);
    assert_back_in_pool(h, builds[0].id);
}

#[rstest]
#[tokio::test]
pub async fn importing_an_absent_chroot_fails(mut single_arch: Harness) {
    let h = &mut single_arch;
    let path = h.tmp_dir.path().join("does-not-exist.tar.gz");
    let result = ops::import_chroot(
        &mut h.connection,
        h.scheduler.store(),
        DUMMY_SERIES,
        "amd64",
        Pocket::Release,
        &path,
    )
    .await;
    assert!(result.is_err());

    import_sources(h, vec![source(DUMMY_SOURCE, "any")]).await;
    h.tick().await;
    assert!(h.slave("amd64").started().is_empty());
}

#[rstest]
#[tokio::test]
pub async fn transfer_integrity_fault_disables_the_builder(mut single_arch: Harness) {
    let h = &mut single_arch;
    import_sources(h, vec![source(DUMMY_SOURCE, "any")]).await;
    import_chroots(h).await;
    h.slave("amd64").corrupt_uploads();
    h.tick().await;

    let builder = h.builder("amd64");
    assert!(!builder.ok);
    assert!(builder.failure_note.unwrap().contains("dispatch failed"));
    assert!(h.slave("amd64").started().is_empty());

    let builds = h.builds();
    assert_back_in_pool(h, builds[0].id);
}

#[rstest]
#[tokio::test]
pub async fn vanished_source_retires_its_build(mut single_arch: Harness) {
    let h = &mut single_arch;
    import_sources(h, vec![source(DUMMY_SOURCE, "any")]).await;
    h.tick().await;
    assert_eq!(h.queue().len(), 1);

    import_sources(h, vec![source(DUMMY_OTHER_SOURCE, "any")]).await;
    h.tick().await;

    let builds = h.builds();
    assert_eq!(builds.len(), 2);
    assert_eq!(builds[0].status, BuildStatus::Superseded);
    assert_eq!(builds[1].status, BuildStatus::NeedsBuild);

    let queue = h.queue();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].build_id, builds[1].id);
}

#[rstest]
#[tokio::test]
pub async fn source_without_files_is_never_dispatched(mut single_arch: Harness) {
    let h = &mut single_arch;
    import_sources(h, vec![source_without_files(DUMMY_SOURCE)]).await;
    import_chroots(h).await;
    for _ in 0..3 {
        h.tick().await;
    }

    let builds = h.builds();
    assert_eq!(builds.len(), 1);
    assert_eq!(builds[0].status, BuildStatus::FailedToBuild);
    assert!(h.queue().is_empty());
    assert!(h.slave("amd64").started().is_empty());

    let created = h
        .scheduler
        .create_missing_build_queue_entries(&mut h.connection)
        .unwrap();
    assert_eq!(created, 0);
    assert!(h.queue().is_empty());
}

#[rstest]
#[tokio::test]
pub async fn security_pocket_is_dispatched_first() {
    let mut config = config_file(&["amd64"]);
    config.schedule.score = Some(ScoreKind::Age);
    let mut h = Harness::new(config);

    import_sources(
        &mut h,
        vec![
            source_in_pocket(DUMMY_SOURCE, Pocket::Release),
            source_in_pocket(DUMMY_OTHER_SOURCE, Pocket::Security),
        ],
    )
    .await;
    import_chroots(&mut h).await;
    h.tick().await;

    let started = h.slave("amd64").started();
    assert_eq!(started.len(), 1);
    assert!(started[0]
        .files
        .contains_key(&source_filename(DUMMY_OTHER_SOURCE, DUMMY_VERSION)));
}

#[rstest]
#[tokio::test]
pub async fn end_to_end_single_build(mut single_arch: Harness) {
    let h = &mut single_arch;
    let slave = h.slave("amd64");
    import_sources(h, vec![source(DUMMY_SOURCE, "any")]).await;
    import_chroots(h).await;
    h.tick().await;

    let builds = h.builds();
    assert_eq!(builds.len(), 1);
    let build = &builds[0];
    assert_eq!(build.status, BuildStatus::NeedsBuild);

    let queue = h.queue();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].builder_id, Some(h.builder("amd64").id));

    let started = slave.started();
    assert_eq!(started.len(), 1);
    let request = &started[0];
    assert_eq!(request.build_cookie, build_cookie(build, &queue[0]));
    assert_eq!(request.build_type, "binarypackage");
    assert!(request
        .files
        .contains_key(&source_filename(DUMMY_SOURCE, DUMMY_VERSION)));
    assert!(slave.has_file(&request.chroot_sha1));

    slave.finish(
        BuildOutcome::Ok,
        &[
            ("hello_2.10-3_amd64.deb", DUMMY_BINARY),
            ("hello-doc_2.10-3_all.deb", DUMMY_OTHER_BINARY),
        ],
        None,
    );
    h.tick().await;

    let build = h.build(build.id);
    assert_eq!(build.status, BuildStatus::FullyBuilt);
    assert_eq!(h.binary_files(&build).len(), 2);
    assert!(h.queue().is_empty());

    h.tick().await;
    assert_eq!(h.builds().len(), 1);
    assert_eq!(slave.started().len(), 1);
}
