//! Types shared between the presence server and its clients.

pub mod config;
pub mod protocol;
pub mod vec3;
