//! Embedded table storage on top of an in-memory B+Tree.
//!
//! Tables keep their records in memory, indexed by primary key, and are
//! saved to and loaded from a directory per database.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod storage;
