//! # Restora Worker
//!
//! Background job runner for image generations.
//!
//! ## Modules
//!
//! - `config`: Environment configuration for the runner
//! - `logging`: Tracing subscriber setup shared by both binaries
//! - `orchestrator`: Claim loop and per-job vendor polling
//! - `queue`: Claiming and resolving jobs in Postgres
//! - `timeout`: Per-job deadlines
//!
//! ## Example
//!
//! ```no_run
//! use restora_worker::orchestrator::{Orchestrator, OrchestratorConfig};
//! use restora_worker::queue::GenerationQueue;
//! use restora_shared::vendor::dashscope::{DashscopeClient, DashscopeConfig};
//! use std::sync::Arc;
//!
//! # async fn example(pool: sqlx::PgPool) -> anyhow::Result<()> {
//! let vendor = Arc::new(DashscopeClient::new(DashscopeConfig::new("sk-..."))?);
//! let orchestrator = Orchestrator::new(
//!     GenerationQueue::new(pool, 600),
//!     vendor,
//!     OrchestratorConfig::default(),
//! );
//! orchestrator.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod logging;
pub mod orchestrator;
pub mod queue;
pub mod timeout;
