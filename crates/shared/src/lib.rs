// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Vendorbill shared types
//!
//! Types and infrastructure used by every crate in the workspace: the subscription
//! tier enum, the clock abstraction, calendar helpers and Postgres pool setup.

pub mod clock;
pub mod db;
pub mod types;

pub use clock::{add_months, Clock, FixedClock, SystemClock};
pub use db::{create_migration_pool, create_pool, run_migrations};
pub use types::{ParseTierError, SubscriptionTier};
