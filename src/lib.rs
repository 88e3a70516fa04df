//! Tollgate - Distributed Request-Admission Control
//!
//! This crate decides, for every inbound HTTP request, whether the caller is
//! over its quota for the current window. Many server processes share one
//! counter store (Redis) as their only coordination point; each decision is
//! a single atomic increment-and-expire round trip. When the store is
//! unavailable requests are let through.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod store;
