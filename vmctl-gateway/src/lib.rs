//! HTTP API gateway for vmctl.
//!
//! Exposes machine registration, engine lifecycle and state-capture
//! endpoints on top of the engine [`Controller`](vmctl_engine::Controller).

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod error;
pub mod registry;
pub mod routes;
