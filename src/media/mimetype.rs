use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};

const OCTET_STREAM: &str = "application/octet-stream";
/// Enough of the header for every container signature `infer` knows.
const SNIFF_LEN: u64 = 8192;

fn sniff(path: &Path) -> Result<Option<infer::Type>> {
    let mut header = Vec::with_capacity(SNIFF_LEN as usize);
    File::open(path)
        .and_then(|f| f.take(SNIFF_LEN).read_to_end(&mut header))
        .with_context(|| format!("Failed to read {:?} for mimetype detection", path))?;
    Ok(infer::get(&header))
}

pub fn detect_mimetype(path: &Path) -> Result<&'static str> {
    Ok(sniff(path)?.map_or(OCTET_STREAM, |k| k.mime_type()))
}

/// True when the sniffed content is a video container. Unknown content is
/// let through, ffprobe has the final say.
pub fn looks_like_video(path: &Path) -> Result<bool> {
    Ok(match sniff(path)? {
        Some(kind) => kind.matcher_type() == infer::MatcherType::Video,
        None => true,
    })
}
