pub mod config;
pub mod coordinator;
pub mod document;
pub mod job;
pub mod normalizer;
pub mod page_scraper;
pub mod portal;
pub mod processor;
pub mod progress;
pub mod records;
pub mod server;
pub mod tabular;
pub mod watcher;
