//! evalbot library — exposes the harness modules for the binary and tests.

pub mod aggregate;
pub mod catalog;
pub mod channel;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod driver;
pub mod environment;
pub mod errors;
pub mod llm;
pub mod protocol;
pub mod report;
pub mod runner;
pub mod scorer;
pub mod user;
