#[cfg(feature = "diesel")]
use diesel::{
    deserialize::FromSql, serialize::IsNull, serialize::Output, serialize::ToSql, sql_types::Text,
    sqlite::Sqlite, sqlite::SqliteValue, AsExpression, FromSqlRow,
};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::str::FromStr;

pub mod api;
pub mod config;
pub mod errors;
pub mod http;
pub mod utils;

#[derive(Debug, Clone)]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "could not parse {:?} as {}", self.value, self.kind)
    }
}

impl Error for ParseEnumError {}

/// Lifecycle of one "build this source for this architecture" record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "diesel", derive(FromSqlRow, AsExpression))]
#[cfg_attr(feature = "diesel", diesel(sql_type = Text))]
#[cfg_attr(feature = "diesel", diesel(check_for_backend(diesel::sqlite::Sqlite)))]
#[serde(rename_all = "UPPERCASE")]
pub enum BuildStatus {
    NeedsBuild,
    FullyBuilt,
    FailedToBuild,
    ManualDepWait,
    ChrootWait,
    Superseded,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::NeedsBuild => "NEEDSBUILD",
            BuildStatus::FullyBuilt => "FULLYBUILT",
            BuildStatus::FailedToBuild => "FAILEDTOBUILD",
            BuildStatus::ManualDepWait => "MANUALDEPWAIT",
            BuildStatus::ChrootWait => "CHROOTWAIT",
            BuildStatus::Superseded => "SUPERSEDED",
        }
    }

    /// Builds an operator may send back to NEEDSBUILD.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BuildStatus::FailedToBuild | BuildStatus::ManualDepWait | BuildStatus::ChrootWait
        )
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEEDSBUILD" => Ok(BuildStatus::NeedsBuild),
            "FULLYBUILT" => Ok(BuildStatus::FullyBuilt),
            "FAILEDTOBUILD" => Ok(BuildStatus::FailedToBuild),
            "MANUALDEPWAIT" => Ok(BuildStatus::ManualDepWait),
            "CHROOTWAIT" => Ok(BuildStatus::ChrootWait),
            "SUPERSEDED" => Ok(BuildStatus::Superseded),
            _ => Err(ParseEnumError {
                kind: "a build status",
                value: s.to_string(),
            }),
        }
    }
}

#[cfg(feature = "diesel")]
impl FromSql<Text, Sqlite> for BuildStatus {
    fn from_sql(bytes: SqliteValue) -> diesel::deserialize::Result<Self> {
        let t = <String as FromSql<Text, Sqlite>>::from_sql(bytes)?;
        Ok(t.parse()?)
    }
}

#[cfg(feature = "diesel")]
impl ToSql<Text, Sqlite> for BuildStatus {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Sqlite>) -> diesel::serialize::Result {
        out.set_value(self.as_str());
        Ok(IsNull::No)
    }
}

/// Publishing state of a source package, owned by the archive publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "diesel", derive(FromSqlRow, AsExpression))]
#[cfg_attr(feature = "diesel", diesel(sql_type = Text))]
#[cfg_attr(feature = "diesel", diesel(check_for_backend(diesel::sqlite::Sqlite)))]
#[serde(rename_all = "UPPERCASE")]
pub enum SourceStatus {
    Pending,
    Published,
    Superseded,
    Deleted,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Pending => "PENDING",
            SourceStatus::Published => "PUBLISHED",
            SourceStatus::Superseded => "SUPERSEDED",
            SourceStatus::Deleted => "DELETED",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, SourceStatus::Pending | SourceStatus::Published)
    }
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(SourceStatus::Pending),
            "PUBLISHED" => Ok(SourceStatus::Published),
            "SUPERSEDED" => Ok(SourceStatus::Superseded),
            "DELETED" => Ok(SourceStatus::Deleted),
            _ => Err(ParseEnumError {
                kind: "a source status",
                value: s.to_string(),
            }),
        }
    }
}

#[cfg(feature = "diesel")]
impl FromSql<Text, Sqlite> for SourceStatus {
    fn from_sql(bytes: SqliteValue) -> diesel::deserialize::Result<Self> {
        let t = <String as FromSql<Text, Sqlite>>::from_sql(bytes)?;
        Ok(t.parse()?)
    }
}

#[cfg(feature = "diesel")]
impl ToSql<Text, Sqlite> for SourceStatus {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Sqlite>) -> diesel::serialize::Result {
        out.set_value(self.as_str());
        Ok(IsNull::No)
    }
}

/// Overlay of a series a source is published into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "diesel", derive(FromSqlRow, AsExpression))]
#[cfg_attr(feature = "diesel", diesel(sql_type = Text))]
#[cfg_attr(feature = "diesel", diesel(check_for_backend(diesel::sqlite::Sqlite)))]
#[serde(rename_all = "UPPERCASE")]
pub enum Pocket {
    Release,
    Security,
    Updates,
    Proposed,
    Backports,
}

impl Pocket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Pocket::Release => "RELEASE",
            Pocket::Security => "SECURITY",
            Pocket::Updates => "UPDATES",
            Pocket::Proposed => "PROPOSED",
            Pocket::Backports => "BACKPORTS",
        }
    }
}

impl fmt::Display for Pocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Pocket {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "RELEASE" => Ok(Pocket::Release),
            "SECURITY" => Ok(Pocket::Security),
            "UPDATES" => Ok(Pocket::Updates),
            "PROPOSED" => Ok(Pocket::Proposed),
            "BACKPORTS" => Ok(Pocket::Backports),
            _ => Err(ParseEnumError {
                kind: "a pocket",
                value: s.to_string(),
            }),
        }
    }
}

#[cfg(feature = "diesel")]
impl FromSql<Text, Sqlite> for Pocket {
    fn from_sql(bytes: SqliteValue) -> diesel::deserialize::Result<Self> {
        let t = <String as FromSql<Text, Sqlite>>::from_sql(bytes)?;
        Ok(t.parse()?)
    }
}

#[cfg(feature = "diesel")]
impl ToSql<Text, Sqlite> for Pocket {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Sqlite>) -> diesel::serialize::Result {
        out.set_value(self.as_str());
        Ok(IsNull::No)
    }
}

/// The `Architecture:` declaration of a source package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchHint {
    /// Architecture independent, built once per series.
    All,
    /// Built on every architecture of the series.
    Any,
    /// Built on the listed architectures only.
    List(Vec<String>),
}

impl ArchHint {
    /// Returns `None` for an empty or otherwise unusable hint.
    pub fn parse(hint: &str) -> Option<ArchHint> {
        let tokens = hint.split_whitespace().collect::<Vec<_>>();
        if tokens.is_empty() {
            return None;
        }

        if tokens.contains(&"any") {
            return Some(ArchHint::Any);
        }

        let archs = tokens
            .iter()
            .filter(|t| **t != "all")
            .map(|t| t.to_string())
            .collect::<Vec<_>>();

        if archs.is_empty() {
            Some(ArchHint::All)
        } else {
            Some(ArchHint::List(archs))
        }
    }

    pub fn wants(&self, arch: &str) -> bool {
        match self {
            ArchHint::All | ArchHint::Any => true,
            ArchHint::List(archs) => archs.iter().any(|a| a == arch),
        }
    }
}
