//! db-redeploy: rolling restart of database Deployments
//!
//! Finds every Deployment whose name contains a substring (by default
//! `"database"`), patches a timestamp annotation into its pod template so the
//! deployment controller rolls out fresh pods, and reports which pods were
//! running when each Deployment was restarted.

pub mod cluster;
pub mod config;
pub mod error;
pub mod redeploy;

pub use crate::error::{Error, Result};
