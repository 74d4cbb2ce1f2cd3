//! Project membership service library crate.
//!
//! # Purpose
//! Exposes the membership authority, identity-provider integration, storage
//! backends, configuration, and the HTTP surface for use by the binary and
//! tests.
pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod identity;
pub mod membership;
pub mod model;
pub mod observability;
pub mod store;
