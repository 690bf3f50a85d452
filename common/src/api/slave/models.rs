use crate::api::slave::SlaveError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Maps a filename to the sha1 of its content.
pub type FileMap = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaveInfo {
    pub protocol_version: String,
    pub methods: Vec<String>,
    pub arch_tag: String,
    pub mechanisms: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoYouHaveRequest {
    pub sha1: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartBuildRequest {
    pub build_cookie: String,
    pub files: FileMap,
    pub chroot_sha1: String,
    pub build_type: String,
}

/// What a builder reports as its own state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderState {
    Idle,
    Building,
    Waiting,
    Aborted,
}

impl BuilderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuilderState::Idle => "IDLE",
            BuilderState::Building => "BUILDING",
            BuilderState::Waiting => "WAITING",
            BuilderState::Aborted => "ABORTED",
        }
    }
}

/// The result of a finished build, reported while the builder is WAITING.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Ok,
    PackageFail,
    DepFail,
    ChrootFail,
    BuilderFail,
    GivenBack,
    Unknown(String),
}

impl BuildOutcome {
    pub fn as_str(&self) -> &str {
        match self {
            BuildOutcome::Ok => "OK",
            BuildOutcome::PackageFail => "PACKAGEFAIL",
            BuildOutcome::DepFail => "DEPFAIL",
            BuildOutcome::ChrootFail => "CHROOTFAIL",
            BuildOutcome::BuilderFail => "BUILDERFAIL",
            BuildOutcome::GivenBack => "GIVENBACK",
            BuildOutcome::Unknown(code) => code,
        }
    }

    pub fn parse(code: &str) -> BuildOutcome {
        match code {
            "OK" => BuildOutcome::Ok,
            "PACKAGEFAIL" => BuildOutcome::PackageFail,
            "DEPFAIL" => BuildOutcome::DepFail,
            "CHROOTFAIL" => BuildOutcome::ChrootFail,
            "BUILDERFAIL" => BuildOutcome::BuilderFail,
            "GIVENBACK" => BuildOutcome::GivenBack,
            _ => BuildOutcome::Unknown(code.to_string()),
        }
    }
}

impl fmt::Display for BuildOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response of the `status` rpc as it travels over the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub builder_state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_cookie: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<FileMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<String>,
    /// sha1 of the full build log in the builder's file cache.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_log: Option<String>,
}

/// Typed view of a [`StatusResponse`], checked at the rpc boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlaveStatus {
    Idle,
    Building {
        build_cookie: String,
    },
    Waiting {
        build_cookie: String,
        outcome: BuildOutcome,
        files: FileMap,
        dependencies: Option<String>,
        build_log: Option<String>,
    },
    Aborted {
        build_cookie: String,
    },
    Unknown(String),
}

impl SlaveStatus {
    pub fn is_idle(&self) -> bool {
        matches!(self, SlaveStatus::Idle)
    }
}

fn require_cookie(resp: &mut StatusResponse) -> Result<String, SlaveError> {
    resp.build_cookie.take().ok_or_else(|| {
        SlaveError::ProtocolFault(format!(
            "builder reported {} without a build cookie",
            resp.builder_state
        ))
    })
}

impl TryFrom<StatusResponse> for SlaveStatus {
    type Error = SlaveError;

    fn try_from(mut resp: StatusResponse) -> Result<Self, Self::Error> {
        let status = match resp.builder_state.as_str() {
            "IDLE" => SlaveStatus::Idle,
            "BUILDING" => SlaveStatus::Building {
                build_cookie: require_cookie(&mut resp)?,
            },
            "ABORTED" => SlaveStatus::Aborted {
                build_cookie: require_cookie(&mut resp)?,
            },
            "WAITING" => {
                let build_cookie = require_cookie(&mut resp)?;
                let outcome = resp
                    .build_status
                    .as_deref()
                    .map(BuildOutcome::parse)
                    .ok_or_else(|| {
                        SlaveError::ProtocolFault(
                            "builder reported WAITING without a build status".to_string(),
                        )
                    })?;
                let files = match (&outcome, resp.files) {
                    (_, Some(files)) => files,
                    (BuildOutcome::Ok, None) => {
                        return Err(SlaveError::ProtocolFault(
                            "builder reported a successful build without a file map".to_string(),
                        ))
                    }
                    (_, None) => FileMap::new(),
                };
                SlaveStatus::Waiting {
                    build_cookie,
                    outcome,
                    files,
                    dependencies: resp.dependencies,
                    build_log: resp.build_log,
                }
            }
            other => SlaveStatus::Unknown(other.to_string()),
        };
        Ok(status)
    }
}

impl From<SlaveStatus> for StatusResponse {
    fn from(status: SlaveStatus) -> StatusResponse {
        match status {
            SlaveStatus::Idle => StatusResponse {
                builder_state: BuilderState::Idle.as_str().to_string(),
                ..Default::default()
            },
            SlaveStatus::Building { build_cookie } => StatusResponse {
                builder_state: BuilderState::Building.as_str().to_string(),
                build_cookie: Some(build_cookie),
                ..Default::default()
            },
            SlaveStatus::Waiting {
                build_cookie,
                outcome,
                files,
                dependencies,
                build_log,
            } => StatusResponse {
                builder_state: BuilderState::Waiting.as_str().to_string(),
                build_cookie: Some(build_cookie),
                build_status: Some(outcome.to_string()),
                files: Some(files),
                dependencies,
                build_log,
            },
            SlaveStatus::Aborted { build_cookie } => StatusResponse {
                builder_state: BuilderState::Aborted.as_str().to_string(),
                build_cookie: Some(build_cookie),
                ..Default::default()
            },
            SlaveStatus::Unknown(state) => StatusResponse {
                builder_state: state,
                ..Default::default()
            },
        }
    }
}
