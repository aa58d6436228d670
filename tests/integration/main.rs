//! Integration tests for Sumi-Ledger
//!
//! These tests run full crawls against in-process fetchers and committers
//! on both data-store engines, across several runs sharing one work
//! directory.

mod common;
mod crawl_tests;
mod resume_tests;
