//! Parameter fan-out server library crate.
//!
//! # Purpose
//! Exposes the server subsystems (config, dispatch, UDP receive loop) for use by
//! the `paramd` binary and integration tests.
//!
//! # Notes
//! The parameter store itself lives in `conparam-store`; this crate only wires it
//! to the transport.
pub mod config;
pub mod dispatcher;
pub mod server;

#[cfg(test)]
mod test_support;
