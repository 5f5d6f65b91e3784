//! Training-side data path: setting-file datasets, prefetching batch loader,
//! learning-rate schedule and the epoch loop.

pub mod dataset;
pub mod loader;
pub mod schedule;
pub mod trainer;
