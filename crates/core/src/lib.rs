//! Core library: scanning, filtering, classification, review and backup.

pub mod backup;
pub mod classifier;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod filter;
pub mod models;
pub mod pipeline;
pub mod rate;
pub mod review;
pub mod scanner;
