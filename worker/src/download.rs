use futures_util::StreamExt;
use buildmaster_common::errors::*;
use buildmaster_common::http;
use buildmaster_common::utils;
use url::Url;

/// Fetch a file the master offered as a download hint and check its sha1.
pub async fn download(url_str: &str, expected_sha1: &str, max_bytes: usize) -> Result<Vec<u8>> {
    let url = url_str
        .parse::<Url>()
        .context("Failed to parse input as url")?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("Refusing to download from unsupported scheme: {:?}", url.scheme());
    }

    info!("Downloading {:?}", url_str);
    let client = http::client()?;
    let mut stream = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .bytes_stream();

    let mut content = Vec::new();
    while let Some(item) = stream.next().await {
        let item = item?;
        if content.len() + item.len() > max_bytes {
            bail!("Download exceeds size limit of {} bytes", max_bytes);
        }
        content.extend_from_slice(&item);
    }
    info!("Downloaded {} bytes", content.len());

    let actual = utils::sha1_hex(&content);
    if actual != expected_sha1 {
        bail!("Downloaded file has sha1 {}, expected {}", actual, expected_sha1);
    }

    Ok(content)
}
