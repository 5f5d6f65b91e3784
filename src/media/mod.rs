pub mod ffmpeg;
pub mod mimetype;
