//! Newsletter Digest - scheduled news digests by category
//!
//! Subscribers pick topic categories and a delivery frequency. On schedule the
//! service queries a news search API for each category concurrently, merges the
//! results and renders an HTML digest into an outbox table for the mail
//! transport to pick up.

pub mod config;
pub mod db;
pub mod digest;
pub mod news;
pub mod preferences;
pub mod routes;
