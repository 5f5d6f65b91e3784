use std::collections::BTreeSet;
use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub frame_count: usize,
    pub width: u32,
    pub height: u32,
    /// Frames per second, informational only.
    pub frame_rate: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    nb_read_packets: Option<String>,
}

/// Reads frame count and geometry of the first video stream.
pub fn probe(input_path: &Path) -> Result<VideoInfo> {
    // -count_packets walks the container so the count is exact even when the
    // header carries no nb_frames.
    let output = Command::new("ffprobe")
        .arg("-v")
        .arg("error")
        .arg("-select_streams")
        .arg("v:0")
        .arg("-count_packets")
        .arg("-show_entries")
        .arg("stream=width,height,avg_frame_rate,nb_frames,nb_read_packets")
        .arg("-of")
        .arg("json")
        .arg(input_path)
        .stdin(Stdio::null())
        .output()
        .context("Failed to execute ffprobe. Is it installed?")?;

    if !output.status.success() {
        return Err(anyhow!(
            "ffprobe exited with non-zero status: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }

    parse_probe_output(&output.stdout)
}

fn parse_probe_output(bytes: &[u8]) -> Result<VideoInfo> {
    let parsed: ProbeOutput = serde_json::from_slice(bytes).context("Failed to parse ffprobe output")?;
    let stream = parsed
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("No video stream found"))?;

    let width = stream.width.ok_or_else(|| anyhow!("Video stream has no width"))?;
    let height = stream.height.ok_or_else(|| anyhow!("Video stream has no height"))?;

    let frame_count = stream
        .nb_read_packets
        .as_deref()
        .or(stream.nb_frames.as_deref())
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| anyhow!("Video stream has no frame count"))?;

    Ok(VideoInfo {
        frame_count,
        width,
        height,
        frame_rate: stream.avg_frame_rate.as_deref().and_then(parse_rate),
    })
}

fn parse_rate(rate: &str) -> Option<f64> {
    let (num, den) = rate.split_once('/')?;
    let num: f64 = num.parse().ok()?;
    let den: f64 = den.parse().ok()?;
    if den == 0.0 {
        return None;
    }
    Some(num / den)
}

/// Builds the `select` filter keeping exactly the given frame numbers.
fn select_filter(indices: &BTreeSet<usize>) -> String {
    let terms: Vec<String> = indices.iter().map(|i| format!("eq(n\\,{i})")).collect();
    format!("select={}", terms.join("+"))
}

/// Decodes the frames at `indices` (any order, duplicates allowed) as packed
/// RGB24 buffers at native resolution. Returns one buffer per distinct index,
/// in ascending index order, paired with its index.
pub fn extract_frames(input_path: &Path, info: &VideoInfo, indices: &[usize]) -> Result<Vec<(usize, Vec<u8>)>> {
    let wanted: BTreeSet<usize> = indices.iter().copied().collect();
    if wanted.is_empty() {
        return Ok(Vec::new());
    }

    let filter = select_filter(&wanted);
    debug!("ffmpeg select filter: {}", filter);

    let output = Command::new("ffmpeg")
        .arg("-v")
        .arg("error")
        .arg("-i")
        .arg(input_path)
        .arg("-vf")
        .arg(&filter)
        .arg("-vsync")
        .arg("0")
        .arg("-f")
        .arg("rawvideo")
        .arg("-pix_fmt")
        .arg("rgb24")
        .arg("-")
        .stdin(Stdio::null())
        .output()
        .context("Failed to spawn ffmpeg command")?;

    if !output.status.success() {
        return Err(anyhow!(
            "ffmpeg exited with non-zero status: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }

    split_frames(output.stdout, info.width, info.height, &wanted)
}

fn split_frames(buffer: Vec<u8>, width: u32, height: u32, wanted: &BTreeSet<usize>) -> Result<Vec<(usize, Vec<u8>)>> {
    let frame_len = width as usize * height as usize * 3;
    if frame_len == 0 {
        return Err(anyhow!("Invalid frame geometry {}x{}", width, height));
    }
    let decoded = buffer.len() / frame_len;
    if buffer.len() % frame_len != 0 || decoded != wanted.len() {
        return Err(anyhow!(
            "Decoded {} bytes, expected {} frames of {}x{}",
            buffer.len(),
            wanted.len(),
            width,
            height
        ));
    }

    Ok(wanted
        .iter()
        .zip(buffer.chunks_exact(frame_len))
        .map(|(&index, chunk)| (index, chunk.to_vec()))
        .collect())
}
