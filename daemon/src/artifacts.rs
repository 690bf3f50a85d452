use crate::models::{Artifact, NewArtifact};
use crate::util;
use buildmaster_common::errors::*;
use buildmaster_common::utils;
use diesel::SqliteConnection;
use std::io::Read;

pub const MIME_OCTET_STREAM: &str = "application/octet-stream";
pub const MIME_BUILD_LOG: &str = "text/plain";

/// Content store for chroots, source files, logs and build results.
///
/// Content is addressed by an opaque id, the sha1 is kept next to it so
/// builders can be asked whether they already have a file.
#[derive(Debug, Clone, Default)]
pub struct ArtifactStore {
    base_url: Option<String>,
}

impl ArtifactStore {
    pub fn new(base_url: Option<String>) -> ArtifactStore {
        ArtifactStore { base_url }
    }

    /// Hash and compress content without touching the database.
    ///
    /// This is split from [`ArtifactStore::put`] so several artifacts can be
    /// inserted in one transaction.
    pub async fn prepare(&self, name: &str, content: &[u8], mime_type: &str) -> Result<NewArtifact> {
        let sha1 = utils::sha1_hex(content);
        let compressed = util::compress(content)
            .await
            .with_context(|| anyhow!("Failed to compress artifact {:?}", name))?;
        trace!(
            "Compressed artifact {:?} from {} to {} bytes",
            name,
            content.len(),
            compressed.len()
        );

        Ok(NewArtifact {
            name: name.to_string(),
            size: content.len() as i64,
            sha1,
            mime_type: mime_type.to_string(),
            content: compressed,
            created_at: chrono::Utc::now().naive_utc(),
        })
    }

    pub async fn put<R: Read>(
        &self,
        connection: &mut SqliteConnection,
        name: &str,
        size: u64,
        mut content: R,
        mime_type: &str,
    ) -> Result<i32> {
        let mut buf = Vec::new();
        content
            .read_to_end(&mut buf)
            .with_context(|| anyhow!("Failed to read artifact {:?}", name))?;
        if buf.len() as u64 != size {
            bail!(
                "Artifact {:?} has {} bytes, but {} were announced",
                name,
                buf.len(),
                size
            );
        }

        let artifact = self.prepare(name, &buf, mime_type).await?;
        let id = artifact.insert(connection)?;
        debug!("Stored artifact {:?} as #{} (sha1={})", name, id, artifact.sha1);
        Ok(id)
    }

    /// Load and decompress an artifact, its sha1 is checked against the recorded one.
    pub async fn get(&self, connection: &mut SqliteConnection, id: i32) -> Result<Vec<u8>> {
        let artifact = Artifact::get_id(id, connection)
            .with_context(|| anyhow!("Failed to load artifact #{}", id))?;
        let content = Artifact::content(id, connection)?;
        let content = util::decompress(content, artifact.size as usize)
            .await
            .with_context(|| anyhow!("Failed to decompress artifact #{} ({:?})", id, artifact.name))?;

        let sha1 = utils::sha1_hex(&content);
        if sha1 != artifact.sha1 {
            bail!("Artifact #{} is corrupt: sha1 is {}, expected {}", id, sha1, artifact.sha1);
        }
        Ok(content)
    }

    pub fn exists(&self, connection: &mut SqliteConnection, id: i32) -> Result<bool> {
        Ok(Artifact::find(id, connection)?.is_some())
    }

    /// Where a builder can download an artifact from, if the store is exposed over http.
    pub fn url(&self, id: i32) -> Option<String> {
        let base = self.base_url.as_ref()?;
        Some(format!("{}/{}", base.trim_end_matches('/'), id))
    }
}
