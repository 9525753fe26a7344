//! Concrete handlers built on `trellis-core`: the static file engine,
//! cache busting, and general-purpose middleware such as timeouts.

pub type AnyError = anyhow::Error;

pub mod common;
pub mod static_files;
