/// Database models and their queries
///
/// - [`user`]: accounts
/// - [`credit`]: balances and the credit ledger
/// - [`package`]: credit package catalogue
/// - [`recharge`]: checkout attempts and their outcome
/// - [`media_upload`]: uploaded source images
/// - [`generation`]: image jobs and their lifecycle
///
/// Models expose associated async functions taking a `&PgPool`, or a
/// `&mut PgConnection` where the caller needs them inside a transaction.

pub mod credit;
pub mod generation;
pub mod media_upload;
pub mod package;
pub mod recharge;
pub mod user;
