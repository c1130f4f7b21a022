// Activate some of the Rust 2024 lints to make the future migration easier.
#![warn(if_let_rescope)]
#![warn(keyword_idents_2024)]
#![warn(rust_2024_incompatible_pat)]
#![warn(tail_expr_drop_order)]
#![warn(unsafe_attr_outside_unsafe)]
#![warn(unsafe_op_in_unsafe_fn)]

pub mod buffer;
pub mod config;
pub mod descriptor;
pub mod error;
mod ring;
pub mod scheduler;
pub mod slot;
pub mod stats;

pub use {
    config::{CopyConfig, CopyConfigBuilder},
    descriptor::Endpoint,
    error::CopyError,
    stats::CopySummary,
};

use scheduler::Scheduler;

/// Alias for file offsets and sizes - since files can exceed 4GB, use 64-bits.
pub type FileSize = u64;

/// Single IO performed on a filesystem can never exceed 32-bits, this also constrains
/// possible buffer sizes used for IO operations.
pub type IoSize = u32;

/// Copy `input` to `output` under `config`, driving the dual-queue scheduler to
/// completion. This is the library's sole entry point: everything else in this crate is
/// a collaborator of this function.
pub fn copy(input: Endpoint, output: Endpoint, config: CopyConfig) -> Result<CopySummary, CopyError> {
    let max_queue_depth = config.max_queue_depth();

    let input_side =
        descriptor::open_side(input, max_queue_depth, config.direct_input()).map_err(|source| {
            CopyError::Io {
                slot: error::SlotKind::Input,
                source,
            }
        })?;
    let output_side = descriptor::open_side(output, max_queue_depth, config.direct_output())
        .map_err(|source| CopyError::Io {
            slot: error::SlotKind::Output,
            source,
        })?;

    Scheduler::new(input_side, output_side, config)?.run()
}
