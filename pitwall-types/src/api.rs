//! # API module
//!
//! Entry point for all REST API version modules.
//!
//! Currently exposes the version 1 API types under [`v1`].

pub mod v1;

/// The name of the correlation-id response header.
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";
