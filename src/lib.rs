// Library for tests to access modules

pub mod collectors;
pub mod config;
pub mod models;
pub mod staleness;
pub mod store;
pub mod version;
pub mod worker;
