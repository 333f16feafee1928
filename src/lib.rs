//! Batched video pipeline runner.
//!
//! A pipeline turns one article URL into a video by scraping it and running a
//! configured chain of subprocess stages. A batch runs one pipeline per topic
//! in fixed windows of parallel jobs. Every step is retried with exponential
//! backoff, checkpointed to disk and, where it costs money, recorded in a
//! soft-budget cost ledger.

pub mod batch;
pub mod checkpoint;
pub mod cli;
pub mod command;
pub mod config;
pub mod cost;
pub mod error;
pub mod firecrawl;
pub mod pipeline;
pub mod runner;
pub mod ui;

pub use error::{Result, VideogenError};
