use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClipError {
    #[error("invalid sampling config: {0}")]
    InvalidConfig(String),
    #[error("video has no frames")]
    EmptyVideo,
    #[error("frame index {index} out of bounds for video with {frame_count} frames")]
    IndexOutOfBounds { index: usize, frame_count: usize },
    #[error("failed to decode frames: {0}")]
    Decode(String),
    #[error("tensor shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ClipError>;
