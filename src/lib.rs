//! campusd: the backend for a small school management system.
//!
//! One SQLite database per deployment, a REST JSON surface on top, and
//! bearer-token roles (admin, teacher, student) gating every route. The
//! HTTP layer lives in [`http`]; [`db`] owns the schema; [`grading`]
//! holds the mark aggregation rules.

pub mod auth;
pub mod backup;
pub mod config;
pub mod db;
pub mod grading;
pub mod http;
