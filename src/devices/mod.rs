//! This module defines all available compute runtimes

pub mod host;

#[cfg(feature = "opencl")]
pub mod opencl;
