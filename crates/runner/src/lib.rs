//! `gensort-runner` library crate.
//!
//! Configuration and the staged batch pipeline, exposed for integration
//! testing. The binary entrypoint lives in `main.rs`.

pub mod config;
pub mod pipeline;
