//! Crawler module for reference processing
//!
//! This module contains the core crawling logic, including:
//! - The fetcher interface documents come through
//! - Crawl coordination over a bounded worker pool
//! - Monitoring counters and statistics

mod coordinator;
mod fetcher;
mod monitor;

pub use coordinator::{Crawler, CrawlerBuilder, CrawlerHandle};
pub use fetcher::{FetchOutcome, FileFetcher, Fetcher};
pub use monitor::{load_statistics, print_statistics, CrawlStatistics, CrawlerMonitor, EventCounter};
