//! # Restora Shared Library
//!
//! This crate contains the domain types, persistence and integrations used by
//! both the Restora API server and the job worker.
//!
//! ## Module Organization
//!
//! - `auth`: Password hashing, JWT tokens, request authentication
//! - `credits`: Credit ledger (grant, debit, refund) with idempotent sources
//! - `db`: Connection pool and migrations
//! - `models`: Database models and their queries
//! - `notify`: Generation status notifications over Postgres `NOTIFY`
//! - `payments`: Payment provider abstraction (Stripe, dummy)
//! - `storage`: Object storage backends for uploaded media
//! - `uploads`: Upload validation and object key derivation
//! - `vendor`: Image-generation vendor client (Dashscope)

pub mod auth;
pub mod credits;
pub mod db;
pub mod models;
pub mod notify;
pub mod payments;
pub mod storage;
pub mod uploads;
pub mod vendor;

/// Current version of the Restora shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
