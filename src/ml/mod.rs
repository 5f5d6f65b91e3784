pub mod device;
pub mod engine;
pub mod labels;
pub mod pipeline;
