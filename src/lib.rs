//! ragbridge: a document gateway in front of a RAG retrieval engine.
//!
//! The server side owns uploads, knowledge bases and ingestion tracking,
//! and proxies queries to the engine. The client side (`ragctl`) drives
//! the same HTTP surface and watches ingestion progress.

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod history;
pub mod ingest;
pub mod persistence;
pub mod poller;
pub mod store;
pub mod structures;
pub mod upstream;
pub mod web;
