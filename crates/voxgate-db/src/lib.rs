//! # voxgate-db
//!
//! `SQLite` persistence adapter for the gateway's session store. The only
//! public surface the rest of the workspace needs is [`setup_database`]
//! plus [`SqliteSessionStore`], which implements
//! `voxgate_core::store::SessionStore`.

pub mod repositories;
pub mod setup;

pub use repositories::SqliteSessionStore;
pub use setup::setup_database;

#[cfg(any(test, feature = "test-utils"))]
pub use setup::setup_test_database;
