pub mod record;
pub mod repo;
pub mod schema;
