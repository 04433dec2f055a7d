//! Route handlers for the HTTP API.

pub mod admin;
pub mod conversions;
pub mod files;
