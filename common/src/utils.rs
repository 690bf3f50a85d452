use data_encoding::HEXLOWER;
use sha1::{Digest, Sha1};

pub fn secs_to_human(duration: i64) -> String {
    let secs = duration % 60;
    let mins = duration / 60;
    let hours = mins / 60;
    let mins = mins % 60;

    let mut out = Vec::new();
    if hours > 0 {
        out.push(format!("{:2}h", hours));
    }
    if mins > 0 || hours > 0 {
        out.push(format!("{:2}m", mins));
    }
    out.push(format!("{:2}s", secs));

    out.join(" ")
}

/// Hex encoded sha1, the key builders use for their file cache.
pub fn sha1_hex(data: &[u8]) -> String {
    let digest = Sha1::digest(data);
    HEXLOWER.encode(&digest)
}

/// Only accept something that looks like a sha1 before using it as a filename.
pub fn is_sha1_hex(s: &str) -> bool {
    s.len() == 40 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Keep at most `limit` bytes from the end of `data`.
pub fn tail(data: &[u8], limit: usize) -> &[u8] {
    if data.len() > limit {
        &data[data.len() - limit..]
    } else {
        data
    }
}
