mod models;

use crate::errors::*;
use crate::http;
use crate::utils;
use async_trait::async_trait;
pub use models::*;
use std::time::Duration;
use url::Url;

/// Faults a builder can produce, every rpc returns one of these on failure.
#[derive(Debug, thiserror::Error)]
pub enum SlaveError {
    /// Network trouble or a timeout, retried on the next cycle.
    #[error("builder is unreachable: {0}")]
    Unreachable(String),
    /// The builder answered, but not in a way we understand.
    #[error("protocol fault: {0}")]
    ProtocolFault(String),
    #[error("transfer integrity error: expected sha1 {expected}, builder computed {actual}")]
    TransferIntegrity { expected: String, actual: String },
}

impl From<reqwest::Error> for SlaveError {
    fn from(err: reqwest::Error) -> SlaveError {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            SlaveError::Unreachable(err.to_string())
        } else {
            SlaveError::ProtocolFault(err.to_string())
        }
    }
}

/// The rpc surface of a single builder.
#[async_trait]
pub trait SlaveRpc: Send + Sync {
    async fn echo(&self, args: &[String]) -> Result<Vec<String>, SlaveError>;

    async fn info(&self) -> Result<SlaveInfo, SlaveError>;

    /// Ask whether the builder has a file with this sha1, `url` is a download hint.
    async fn have_file(&self, sha1: &str, url: Option<&str>) -> Result<bool, SlaveError>;

    /// Returns the sha1 the builder computed for the stored content.
    async fn store_file(&self, content: Vec<u8>) -> Result<String, SlaveError>;

    async fn start_build(&self, request: &StartBuildRequest) -> Result<(), SlaveError>;

    async fn status(&self) -> Result<SlaveStatus, SlaveError>;

    async fn fetch_log_tail(&self) -> Result<Vec<u8>, SlaveError>;

    async fn fetch_file(&self, sha1: &str) -> Result<Vec<u8>, SlaveError>;

    async fn clean(&self) -> Result<(), SlaveError>;

    /// Store a file and make sure the builder agrees on its sha1.
    async fn store_file_verified(&self, content: Vec<u8>, expected: &str) -> Result<(), SlaveError> {
        let actual = self.store_file(content).await?;
        if actual != expected {
            return Err(SlaveError::TransferIntegrity {
                expected: expected.to_string(),
                actual,
            });
        }
        Ok(())
    }
}

/// Talks to a builder over http.
pub struct HttpSlave {
    endpoint: Url,
    client: http::Client,
}

impl HttpSlave {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<HttpSlave> {
        let mut endpoint = endpoint
            .parse::<Url>()
            .with_context(|| anyhow!("Failed to parse builder url: {:?}", endpoint))?;

        // If the url ends with a slash, remove it
        endpoint
            .path_segments_mut()
            .map_err(|_| anyhow!("Given builder url cannot be base"))?
            .pop_if_empty();

        let client = http::slave_client(timeout)?;
        Ok(HttpSlave { endpoint, client })
    }

    fn url_join(&self, route: &str) -> Url {
        let mut url = self.endpoint.clone();
        {
            // this unwrap is safe because we've called path_segments_mut in the constructor before
            let mut path = url.path_segments_mut().expect("Url cannot be base");
            for segment in route.split('/') {
                path.push(segment);
            }
        }
        url
    }

    fn get(&self, route: &str) -> http::RequestBuilder {
        self.client.get(self.url_join(route))
    }

    fn post(&self, route: &str) -> http::RequestBuilder {
        self.client.post(self.url_join(route))
    }
}

#[async_trait]
impl SlaveRpc for HttpSlave {
    async fn echo(&self, args: &[String]) -> Result<Vec<String>, SlaveError> {
        let reply = self
            .post("rpc/echo")
            .json(args)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(reply)
    }

    async fn info(&self) -> Result<SlaveInfo, SlaveError> {
        let info = self
            .get("rpc/info")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(info)
    }

    async fn have_file(&self, sha1: &str, url: Option<&str>) -> Result<bool, SlaveError> {
        let have = self
            .post("rpc/doyouhave")
            .json(&DoYouHaveRequest {
                sha1: sha1.to_string(),
                url: url.map(String::from),
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(have)
    }

    async fn store_file(&self, content: Vec<u8>) -> Result<String, SlaveError> {
        let sha1 = self
            .post("rpc/storefile")
            .body(content)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(sha1)
    }

    async fn start_build(&self, request: &StartBuildRequest) -> Result<(), SlaveError> {
        self.post("rpc/startbuild")
            .json(request)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn status(&self) -> Result<SlaveStatus, SlaveError> {
        let resp = self
            .get("rpc/status")
            .send()
            .await?
            .error_for_status()?
            .json::<StatusResponse>()
            .await?;
        SlaveStatus::try_from(resp)
    }

    async fn fetch_log_tail(&self) -> Result<Vec<u8>, SlaveError> {
        let data = self
            .get("rpc/fetchlogtail")
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(Vec::from(data))
    }

    async fn fetch_file(&self, sha1: &str) -> Result<Vec<u8>, SlaveError> {
        if !utils::is_sha1_hex(sha1) {
            return Err(SlaveError::ProtocolFault(format!(
                "refusing to fetch file with invalid sha1: {:?}",
                sha1
            )));
        }

        let data = self
            .get(&format!("filecache/{sha1}"))
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        let actual = utils::sha1_hex(&data);
        if actual != sha1 {
            return Err(SlaveError::TransferIntegrity {
                expected: sha1.to_string(),
                actual,
            });
        }

        Ok(Vec::from(data))
    }

    async fn clean(&self) -> Result<(), SlaveError> {
        self.post("rpc/clean").send().await?.error_for_status()?;
        Ok(())
    }
}
