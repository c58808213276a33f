//! Core types and traits for the Shortmint identifier allocator.
//!
//! This crate provides the base-62 short code encoding and the
//! [`Generator`] trait implemented by identifier sources.

pub mod base62;
pub mod error;
pub mod generator;

pub use base62::ShortCodeBase62;
pub use error::CoreError;
pub use generator::Generator;
