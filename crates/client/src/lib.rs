//! HTTP transport for snapcache.
//!
//! This crate provides [`HttpFetcher`], the reqwest-backed implementation of
//! the core's [`Fetcher`](snapcache_core::Fetcher) seam.

pub mod fetch;

pub use fetch::{FetchConfig, HttpFetcher};
