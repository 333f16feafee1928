pub mod client;
pub mod error;
pub mod types;

use std::future::Future;

pub use client::FirecrawlClient;
pub use error::ScrapeError;
pub use types::{DatasetRecord, ScrapedArticle};

/// Fetches an article as markdown.
pub trait Scraper {
    fn scrape(&self, url: &str) -> impl Future<Output = Result<ScrapedArticle, ScrapeError>>;
}
