pub mod cache;
pub mod cli;
pub mod compare;
pub mod compose;
pub mod date_set;
pub mod fetch;
pub mod focus;
pub mod freshness;
pub mod index_feed;
pub mod jobs;
pub mod metrics;
pub mod returns_loader;
pub mod scaling;
pub mod scheduler;
pub mod significance;
pub mod trend;
pub mod universe;
pub mod verify;
