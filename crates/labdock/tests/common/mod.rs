//! Shared test utilities for labdock integration tests.
//!
//! - `TestHarness`: temp directories, in-memory database and a `RuntimeCore`
//!   wired to a filesystem object store and a fake container engine
//! - archive builders for zip, tar.gz and rar submissions

pub mod builders;
pub mod fake_engine;
pub mod harness;

pub use builders::*;
pub use fake_engine::FakeEngine;
pub use harness::TestHarness;
