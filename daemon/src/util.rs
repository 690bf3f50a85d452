use buildmaster_common::errors::*;
use std::io::{Read, Write};
use zstd::{Decoder, Encoder};

pub const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

const ZSTD_LEVEL: i32 = 11;

// matches the internal buffer of zstd
pub const ZSTD_CHUNK_SIZE: usize = 1024 * 128;

/// Compress artifact content, yielding to the runtime between chunks.
///
/// Chroots are big, this keeps a single import from stalling the scheduler loop.
pub async fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = Encoder::new(Vec::with_capacity(data.len() / 4), ZSTD_LEVEL)?;
    for chunk in data.chunks(ZSTD_CHUNK_SIZE) {
        tokio::task::yield_now().await;
        encoder.write_all(chunk)?;
    }
    Ok(encoder.finish()?)
}

/// Decompress artifact content that is expected to be exactly `size` bytes.
///
/// Uncompressed content is passed through unchanged.
pub async fn decompress(data: Vec<u8>, size: usize) -> Result<Vec<u8>> {
    if !is_zstd_compressed(&data) {
        if data.len() != size {
            bail!("Stored artifact has {} bytes, expected {}", data.len(), size);
        }
        return Ok(data);
    }

    let mut decoder = Decoder::new(&data[..])?;
    let mut out = Vec::with_capacity(size);
    let mut buf = vec![0u8; ZSTD_CHUNK_SIZE];
    loop {
        tokio::task::yield_now().await;

        let n = decoder.read(&mut buf)?;
        if n == 0 {
            break;
        }
        if out.len() + n > size {
            bail!("Artifact inflates beyond its recorded size of {} bytes", size);
        }
        out.extend_from_slice(&buf[..n]);
    }

    if out.len() != size {
        bail!("Artifact decompressed to {} bytes, expected {}", out.len(), size);
    }
    Ok(out)
}

pub fn is_zstd_compressed(data: &[u8]) -> bool {
    data.starts_with(&ZSTD_MAGIC)
}
