//! Runtime configuration for the worker pool.
//!
//! This module configures the runtime environment workers run in: how many
//! worker threads to spawn, which I/O driver to use and whether workers are
//! pinned to CPU cores. Each worker runs its own single-threaded runtime;
//! handlers never migrate between workers.

use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

// Default iouring/epoll entries: 32k
const DEFAULT_ENTRIES: u32 = 32768;

pub const FALLBACK_PARALLELISM: NonZeroUsize = NonZeroUsize::MIN;

/// Configuration options for the runtime environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Number of worker threads, each with its own event loop.
    ///
    /// With more than one worker the adapter must permit address sharing
    /// (e.g. SO_REUSEPORT) so every worker can accept.
    #[serde(default = "default_workers")]
    pub worker_threads: usize,

    /// Number of I/O entries for event handling for io_uring.
    #[serde(default = "default_entries")]
    pub entries: u32,

    /// The type of runtime to use.
    #[serde(default)]
    pub runtime_type: RuntimeType,

    /// Whether to enable CPU affinity for worker threads.
    #[serde(default = "default_cpu_affinity")]
    pub cpu_affinity: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            worker_threads: default_workers(),
            entries: default_entries(),
            runtime_type: Default::default(),
            cpu_affinity: default_cpu_affinity(),
        }
    }
}

/// Enum representing different runtime implementation options.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeType {
    /// io_uring-based runtime (Linux only).
    #[cfg(target_os = "linux")]
    IoUring,

    /// Legacy runtime implementation.
    Legacy,
}

impl Default for RuntimeType {
    #[cfg(target_os = "linux")]
    fn default() -> Self {
        Self::IoUring
    }
    #[cfg(not(target_os = "linux"))]
    fn default() -> Self {
        Self::Legacy
    }
}

macro_rules! define_const {
    ($name: ident, $val: expr, $type: ty) => {
        const fn $name() -> $type {
            $val
        }
    };
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .unwrap_or(FALLBACK_PARALLELISM)
        .into()
}

define_const!(default_entries, DEFAULT_ENTRIES, u32);
define_const!(default_cpu_affinity, false, bool);
