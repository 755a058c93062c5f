//! # Restora API Server Library
//!
//! HTTP surface of Restora: accounts, credits and payments, uploads, and the
//! image job submission endpoint with live status events.
//!
//! ## Modules
//!
//! - `app`: Application state and router builder
//! - `config`: Configuration from the environment
//! - `error`: Error handling and HTTP response mapping
//! - `middleware`: Security headers and submission rate limiting
//! - `routes`: API route handlers

pub mod app;
pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
