pub mod citation;
pub mod query;
