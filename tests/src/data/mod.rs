use buildmaster::sync::SourceImport;
use buildmaster_common::config::{BuilderConfig, ConfigFile, SeriesConfig};
use buildmaster_common::Pocket;
use std::path::PathBuf;

pub const DUMMY_SERIES: &str = "noble";
pub const DUMMY_SOURCE: &str = "hello";
pub const DUMMY_OTHER_SOURCE: &str = "zstd";
pub const DUMMY_VERSION: &str = "2.10-3";
pub const DUMMY_DEPENDENCIES: &str = "libfoo-dev (>= 2.0)";

pub const ARCHITECTURES: &[&str] = &["amd64", "i386", "armhf", "arm64", "riscv64"];

pub const DUMMY_BINARY: &[u8] = b"!<arch>\ndebian-binary   ";
pub const DUMMY_OTHER_BINARY: &[u8] = b"!<arch>\ndata.tar.zst   ";

pub fn builder_name(processor: &str) -> String {
    format!("{}-builder", processor)
}

pub fn builder_url(processor: &str) -> String {
    format!("http://{}-builder.example:8221", processor)
}

/// One series, every architecture is its own processor family with one builder.
pub fn config_file(archs: &[&str]) -> ConfigFile {
    let pairs = archs.iter().map(|arch| (*arch, *arch)).collect::<Vec<_>>();
    config_with_processors(&pairs)
}

/// One series with `(architecture, processor)` pairs and one builder per processor family.
pub fn config_with_processors(archs: &[(&str, &str)]) -> ConfigFile {
    let mut config = ConfigFile::default();
    config.schedule.series = vec![DUMMY_SERIES.to_string()];

    let mut series = SeriesConfig::default();
    for (arch, processor) in archs {
        series
            .architectures
            .insert(arch.to_string(), processor.to_string());
        config.builders.insert(
            builder_name(processor),
            BuilderConfig {
                url: builder_url(processor),
                processor: processor.to_string(),
                manual: false,
            },
        );
    }
    config.series.insert(DUMMY_SERIES.to_string(), series);

    config
}

pub fn source_filename(name: &str, version: &str) -> String {
    format!("{}_{}.dsc", name, version)
}

pub fn source(name: &str, architecture_hint: &str) -> SourceImport {
    SourceImport {
        name: name.to_string(),
        version: DUMMY_VERSION.to_string(),
        pocket: Pocket::Release,
        component: "main".to_string(),
        architecture_hint: architecture_hint.to_string(),
        status: None,
        files: vec![PathBuf::from(source_filename(name, DUMMY_VERSION))],
    }
}

pub fn source_in_pocket(name: &str, pocket: Pocket) -> SourceImport {
    SourceImport {
        pocket,
        ..source(name, "any")
    }
}

pub fn source_without_files(name: &str) -> SourceImport {
    SourceImport {
        files: Vec::new(),
        ..source(name, "any")
    }
}
