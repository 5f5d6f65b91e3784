pub mod clip;
pub mod database;
pub mod ingest;
pub mod media;
pub mod ml;
pub mod service;
pub mod training;
pub mod utils;
