//! Unit tests for the Dogu Operator
//!
//! This module contains unit tests for:
//! - Resource generators (Deployment, Service, data claim, exec pod)
//! - Status conditions and dogu health
//! - Use case selection and pipeline composition
//! - Whole reconcile passes against an in-memory cluster (install, upgrade,
//!   config restart, volume growth, deletion)

#[path = "../common/mod.rs"]
mod common;

mod install_flow;
mod status;
mod upgrade_flow;
mod use_cases;
