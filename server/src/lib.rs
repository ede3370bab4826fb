//! Presence relay server library.
//!
//! This module exposes the server components for use in tests and binaries.

pub mod app;
pub mod config;
pub mod dispatcher;
pub mod hub;
pub mod registry;
pub mod router;
pub mod session;
pub mod validator;
pub mod ws;
