//! Catchup: priority triage for missed team messages.

pub mod analysis;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod patterns;
pub mod scoring;
pub mod source;
pub mod store;
pub mod todos;
