//! State module for classifying crawl outcomes
//!
//! # Components
//!
//! - `CrawlState`: The outcome of processing a reference (new, modified, not found, ...)
//! - `ReferenceRecord`: What is remembered about a reference between runs

mod crawl_state;
mod reference;

// Re-export main types
pub use crawl_state::CrawlState;
pub use reference::ReferenceRecord;
