//! Test utilities and helpers for the native-guard crates.
//!
//! This crate provides:
//! - [`sink::RecordingSink`] to capture diagnostics in emission order
//! - [`probe::ReleaseProbe`] to count release callback invocations per address
//! - [`resource::TestResource`] a wrapper type shaped like generated bindings
//!
//! # Usage
//!
//! This crate is intended for use within the native-guard test suites and tools.

pub mod probe;
pub mod resource;
pub mod sink;
