//! BOOKIE — Dynamic-Parimutuel Bet Settlement Engine
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod api;
pub mod config;
pub mod ledger;
pub mod pricing;
pub mod store;
pub mod types;
pub mod validate;
