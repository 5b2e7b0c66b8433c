//! Infrastructure layer: configuration, logging, persistence and HTTP.

pub mod config;
pub mod crawl_store;
pub mod database_connection;
pub mod http_client;
pub mod job_queue;
pub mod logging;

pub use config::EngineConfig;
pub use crawl_store::SqliteCrawlStore;
pub use database_connection::DatabaseConnection;
pub use http_client::{build_client, HttpFetcherFactory};
pub use job_queue::SqliteJobQueue;
pub use logging::init_logging;
