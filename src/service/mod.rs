pub mod endpoint;
pub mod trigger;
