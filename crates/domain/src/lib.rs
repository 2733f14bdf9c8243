//! Shared types for the batch-RPC client runtime.
//!
//! Holds the classified [`error::Error`] taxonomy, the [`credentials::CredentialSet`]
//! sent with every call, [`job::JobStatus`] for long-running server jobs,
//! configuration, and structured [`trace::TraceEvent`]s.

pub mod config;
pub mod credentials;
pub mod error;
pub mod job;
pub mod trace;
