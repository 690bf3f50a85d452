use buildmaster_common::errors::*;
use buildmaster_common::utils;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Files the master sent us, addressed by the sha1 of their content.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub async fn open(dir: &Path) -> Result<FileCache> {
        fs::create_dir_all(dir)
            .await
            .with_context(|| anyhow!("Failed to create file cache: {:?}", dir))?;
        let dir = fs::canonicalize(dir).await?;
        Ok(FileCache { dir })
    }

    pub fn path(&self, sha1: &str) -> Result<PathBuf> {
        if !utils::is_sha1_hex(sha1) {
            bail!("Invalid sha1: {:?}", sha1);
        }
        Ok(self.dir.join(sha1))
    }

    pub async fn has(&self, sha1: &str) -> Result<bool> {
        let path = self.path(sha1)?;
        Ok(fs::try_exists(&path).await?)
    }

    /// Store content, returns its sha1.
    pub async fn store(&self, content: &[u8]) -> Result<String> {
        let sha1 = utils::sha1_hex(content);
        let path = self.path(&sha1)?;
        if !fs::try_exists(&path).await? {
            let tmp = self.dir.join(format!(".{}.tmp", sha1));
            fs::write(&tmp, content)
                .await
                .with_context(|| anyhow!("Failed to write {:?}", tmp))?;
            fs::rename(&tmp, &path).await?;
            debug!("Stored {} bytes as {}", content.len(), sha1);
        }
        Ok(sha1)
    }

    pub async fn get(&self, sha1: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(sha1)?;
        match fs::read(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Error::from(err).context(format!("Failed to read {:?}", path))),
        }
    }
}
