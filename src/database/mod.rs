pub mod assets;
pub mod query;
pub mod repo;
pub mod schema;
pub mod taxonomy;
