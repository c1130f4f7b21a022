//! Completion notifier (§4.4), implemented as a thin wrapper around `io_uring::IoUring`.
//!
//! The contract required of a completion notifier is exactly "may wake up spuriously;
//! will wake up eventually after a completion" — the scheduler does not rely on it
//! carrying identity. `io_uring`'s own bounded wait (`submit_with_args` with a kernel-side
//! relative timeout) satisfies this directly: the kernel wakes the calling thread itself,
//! so there is no separate signal-delivery path to get wrong.
//!
//! Submissions are tagged with `user_data` set to the slab key the caller wants back on
//! completion (here, a [`crate::slot::Slot`] index); the ring itself knows nothing about
//! slots, queues, or ordering.

use {
    io_uring::{opcode, types, IoUring},
    std::{fmt, io, os::fd::RawFd, time::Duration},
};

/// One reaped completion queue entry.
pub struct Completion {
    pub user_data: usize,
    pub result: i32,
}

/// Why a submission failed. `SPEC_FULL.md` §4.4 treats a full submission queue as an
/// allocation failure rather than a generic I/O error, so it is distinguished here instead
/// of being folded into `io::Error`.
#[derive(Debug)]
pub enum SubmitError {
    QueueFull,
    Io(io::Error),
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitError::QueueFull => f.write_str("submission queue is full"),
            SubmitError::Io(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for SubmitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SubmitError::QueueFull => None,
            SubmitError::Io(err) => Some(err),
        }
    }
}

pub struct Ring {
    io_uring: IoUring,
}

impl Ring {
    pub fn new(entries: u32) -> io::Result<Self> {
        let io_uring = IoUring::builder().build(entries)?;
        Ok(Self { io_uring })
    }

    /// Submit a read of `len` bytes from `fd` at `offset` into `buf`, tagged `user_data`.
    /// When `buf_index` is `Some`, `buf` must fall within the registered buffer at that
    /// index and the read is issued as `ReadFixed` instead of a plain `Read`.
    ///
    /// # Safety
    /// `buf` must remain valid and exclusively owned by the kernel until a completion with
    /// this `user_data` is reaped.
    pub unsafe fn submit_read(
        &mut self,
        fd: RawFd,
        buf: *mut u8,
        len: u32,
        offset: u64,
        user_data: usize,
        buf_index: Option<u16>,
    ) -> Result<(), SubmitError> {
        let entry = match buf_index {
            Some(index) => opcode::ReadFixed::new(types::Fd(fd), buf, len, index)
                .offset(offset)
                .build(),
            None => opcode::Read::new(types::Fd(fd), buf, len).offset(offset).build(),
        }
        .user_data(user_data as u64);
        // SAFETY: forwarded from this function's own safety contract.
        unsafe { self.push(entry) }
    }

    /// Submit a write of `len` bytes from `buf` to `fd` at `offset`, tagged `user_data`.
    /// When `buf_index` is `Some`, `buf` must fall within the registered buffer at that
    /// index and the write is issued as `WriteFixed` instead of a plain `Write`.
    ///
    /// # Safety
    /// `buf` must remain valid and exclusively owned by the kernel until a completion with
    /// this `user_data` is reaped.
    pub unsafe fn submit_write(
        &mut self,
        fd: RawFd,
        buf: *const u8,
        len: u32,
        offset: u64,
        user_data: usize,
        buf_index: Option<u16>,
    ) -> Result<(), SubmitError> {
        let entry = match buf_index {
            Some(index) => opcode::WriteFixed::new(types::Fd(fd), buf, len, index)
                .offset(offset)
                .build(),
            None => opcode::Write::new(types::Fd(fd), buf, len).offset(offset).build(),
        }
        .user_data(user_data as u64);
        // SAFETY: forwarded from this function's own safety contract.
        unsafe { self.push(entry) }
    }

    unsafe fn push(&mut self, entry: io_uring::squeue::Entry) -> Result<(), SubmitError> {
        // SAFETY: caller's safety contract on the referenced buffer.
        unsafe { self.io_uring.submission().push(&entry) }.map_err(|_| SubmitError::QueueFull)
    }

    /// Flush pending submissions and block until at least one completes or `timeout`
    /// elapses, whichever comes first. A timeout is not an error: it is the expected,
    /// common case of a spurious (or simply empty) wakeup.
    pub fn wait(&mut self, timeout: Duration) -> io::Result<()> {
        let timespec = types::Timespec::new()
            .sec(timeout.as_secs())
            .nsec(timeout.subsec_nanos());
        let args = types::SubmitArgs::new().timespec(&timespec);
        match self.io_uring.submitter().submit_with_args(1, &args) {
            Ok(_) => Ok(()),
            Err(err) if err.raw_os_error() == Some(libc::ETIME) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Drain every completion queue entry currently available without blocking.
    pub fn drain(&mut self) -> Vec<Completion> {
        self.io_uring
            .completion()
            .map(|cqe| Completion {
                user_data: cqe.user_data() as usize,
                result: cqe.result(),
            })
            .collect()
    }

    /// Register a fixed buffer set; used when `CopyConfig::use_registered_buffers` opts in
    /// to `IORING_REGISTER_BUFFERS` for cheaper per-operation fixed-buffer reads/writes.
    ///
    /// # Safety
    /// Every `iovec` must stay valid and untouched by anything but the kernel for as long
    /// as it remains registered.
    pub unsafe fn register_buffers(&self, iovecs: &[libc::iovec]) -> io::Result<()> {
        // SAFETY: forwarded from this function's own safety contract.
        unsafe { self.io_uring.submitter().register_buffers(iovecs) }
    }
}
