use crate::data::{self, DUMMY_SERIES, DUMMY_SOURCE};
use crate::fixtures::Harness;
use buildmaster::ops;
use buildmaster::sync::{self, SeriesImport, SourceImport};
use buildmaster_common::Pocket;
use std::fs;

/// Publish `sources` as the complete content of the series.
pub async fn import_sources(h: &mut Harness, sources: Vec<SourceImport>) {
    for source in &sources {
        for file in &source.files {
            let content = format!("Source: {}\nVersion: {}\n", source.name, source.version);
            fs::write(h.tmp_dir.path().join(file), content).unwrap();
        }
    }

    let import = SeriesImport {
        series: DUMMY_SERIES.to_string(),
        sources,
    };
    sync::run(import, h.tmp_dir.path(), h.scheduler.store(), &mut h.connection)
        .await
        .unwrap();
}

/// A RELEASE chroot for every architecture of the series.
pub async fn import_chroots(h: &mut Harness) {
    for das in h.architectures() {
        let path = h.tmp_dir.path().join(format!("chroot-{}.tar.gz", das.architecture));
        fs::write(&path, format!("chroot for {}", das.architecture)).unwrap();
        ops::import_chroot(
            &mut h.connection,
            h.scheduler.store(),
            DUMMY_SERIES,
            &das.architecture,
            Pocket::Release,
            &path,
        )
        .await
        .unwrap();
    }
}

pub async fn setup_single_source(h: &mut Harness, architecture_hint: &str) {
    import_sources(h, vec![data::source(DUMMY_SOURCE, architecture_hint)]).await;
    h.refresh_pools().await;
}

/// One source built on one architecture, dispatched to the amd64 builder.
pub async fn setup_single_dispatched_build(h: &mut Harness) -> i32 {
    import_sources(h, vec![data::source(DUMMY_SOURCE, "any")]).await;
    import_chroots(h).await;
    h.tick().await;

    let builds = h.builds();
    assert_eq!(builds.len(), 1);
    assert_eq!(h.slave("amd64").started().len(), 1);
    builds[0].id
}
