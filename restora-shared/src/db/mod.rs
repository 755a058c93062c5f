/// Database layer for Restora
///
/// - `pool`: PostgreSQL connection pool with health checks
/// - `migrations`: Embedded schema migrations (`migrations/` at the workspace root)
///
/// Models live in the crate-level `models` module.
///
/// # Example
///
/// ```no_run
/// use restora_shared::db::pool::{create_pool, DatabaseConfig};
/// use restora_shared::db::migrations::run_migrations;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = create_pool(DatabaseConfig {
///     url: std::env::var("DATABASE_URL")?,
///     ..Default::default()
/// })
/// .await?;
/// run_migrations(&pool).await?;
/// # Ok(())
/// # }
/// ```

pub mod migrations;
pub mod pool;
