//! Error Types for logflow-core
//!
//! This module defines the errors that can occur while constructing records
//! or moving them through the wire frame codec.
//!
//! ## Error Categories
//!
//! ### Record Errors
//! - `InvalidRecord`: a record invariant was violated (empty key, or both
//!   control flags requested at once)
//!
//! ### Frame Errors
//! - `InvalidFrame`: a frame could not be decoded (truncated buffer, negative
//!   length, unknown flag bits)
//! - `FrameTooLarge`: a declared key or value length exceeds the frame limit
//!
//! ## Usage
//! All fallible functions in this crate return `Result<T>`, aliased to
//! `Result<T, Error>`, so callers can use the `?` operator.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Frame section of {0} bytes exceeds limit of {1} bytes")]
    FrameTooLarge(usize, usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
