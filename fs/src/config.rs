//! Explicit configuration value passed to the scheduler, replacing the process-wide
//! parameter record of the source implementation: no process-wide mutable state is kept
//! anywhere in this crate.
#![allow(clippy::arithmetic_side_effects)]

use {crate::error::ConfigError, std::time::Duration};

pub const MIN_BLOCK_SIZE: u32 = 512;
pub const MAX_BLOCK_SIZE: u32 = 16 * 1024 * 1024;
pub const MIN_QUEUE_DEPTH: u32 = 1;
pub const MAX_QUEUE_DEPTH: u32 = 32;

/// Default bounded-wait timeout for the completion notifier (Open Question 3 of the
/// distilled spec: kept adjustable rather than hardcoded).
pub const DEFAULT_WAKE_TIMEOUT: Duration = Duration::from_micros(100);

/// Resolved, validated configuration for one invocation of [`crate::copy`].
#[derive(Clone, Debug)]
pub struct CopyConfig {
    pub(crate) block_size: u32,
    pub(crate) max_queue_depth: u32,
    pub(crate) direct_input: bool,
    pub(crate) direct_output: bool,
    pub(crate) use_registered_buffers: bool,
    pub(crate) wake_timeout: Duration,
}

impl CopyConfig {
    pub fn builder() -> CopyConfigBuilder {
        CopyConfigBuilder::new()
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn max_queue_depth(&self) -> u32 {
        self.max_queue_depth
    }

    pub fn direct_input(&self) -> bool {
        self.direct_input
    }

    pub fn direct_output(&self) -> bool {
        self.direct_output
    }

    pub fn use_registered_buffers(&self) -> bool {
        self.use_registered_buffers
    }

    pub fn wake_timeout(&self) -> Duration {
        self.wake_timeout
    }
}

/// Builder for [`CopyConfig`]. Validation happens once, in [`CopyConfigBuilder::build`].
#[derive(Clone, Debug)]
pub struct CopyConfigBuilder {
    block_size: Option<u32>,
    max_queue_depth: Option<u32>,
    direct_input: bool,
    direct_output: bool,
    use_registered_buffers: bool,
    wake_timeout: Option<Duration>,
}

impl Default for CopyConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CopyConfigBuilder {
    pub fn new() -> Self {
        Self {
            block_size: None,
            max_queue_depth: None,
            direct_input: false,
            direct_output: false,
            use_registered_buffers: false,
            wake_timeout: None,
        }
    }

    /// Bytes per block. Defaults to 1 MiB. Must be a multiple of 512 in `[512, 16 MiB]`.
    pub fn block_size(mut self, bytes: u32) -> Self {
        self.block_size = Some(bytes);
        self
    }

    /// Maximum in-flight operations per direction, before the seekability clamp of §4.5.
    /// Defaults to 16. Must be in `[1, 32]`.
    pub fn max_queue_depth(mut self, depth: u32) -> Self {
        self.max_queue_depth = Some(depth);
        self
    }

    pub fn direct_input(mut self, enabled: bool) -> Self {
        self.direct_input = enabled;
        self
    }

    pub fn direct_output(mut self, enabled: bool) -> Self {
        self.direct_output = enabled;
        self
    }

    pub fn use_registered_buffers(mut self, enabled: bool) -> Self {
        self.use_registered_buffers = enabled;
        self
    }

    /// Overrides the completion notifier's bounded-wait timeout. Mostly useful for tests
    /// that want the scheduler loop to spin faster than the 100 microsecond production default.
    pub fn wake_timeout(mut self, timeout: Duration) -> Self {
        self.wake_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<CopyConfig, ConfigError> {
        let block_size = self.block_size.unwrap_or(1024 * 1024);
        if !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&block_size) {
            return Err(ConfigError::BlockSizeRange(block_size));
        }
        if block_size % MIN_BLOCK_SIZE != 0 {
            return Err(ConfigError::BlockSizeAlignment(block_size));
        }

        let max_queue_depth = self.max_queue_depth.unwrap_or(16);
        if !(MIN_QUEUE_DEPTH..=MAX_QUEUE_DEPTH).contains(&max_queue_depth) {
            return Err(ConfigError::QueueDepthRange(max_queue_depth));
        }

        Ok(CopyConfig {
            block_size,
            max_queue_depth,
            direct_input: self.direct_input,
            direct_output: self.direct_output,
            use_registered_buffers: self.use_registered_buffers,
            wake_timeout: self.wake_timeout.unwrap_or(DEFAULT_WAKE_TIMEOUT),
        })
    }
}
