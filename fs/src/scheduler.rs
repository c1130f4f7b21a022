//! The dual-queue scheduler loop (§4.2, §4.3): the core of this crate.
#![allow(clippy::arithmetic_side_effects)]

use {
    crate::{
        buffer::{alignment_for, AllocError, AlignedBuffer},
        config::CopyConfig,
        descriptor::OpenedSide,
        error::{CopyError, SlotKind},
        ring::{Ring, SubmitError},
        slot::{Slot, SlotStatus},
        stats::CopySummary,
    },
    std::{collections::HashMap, io, time::Instant},
};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Kind {
    Input,
    Output,
}

fn tag(kind: Kind, index: usize) -> usize {
    index * 2 + (kind == Kind::Output) as usize
}

fn untag(value: usize) -> (Kind, usize) {
    let kind = if value % 2 == 0 { Kind::Input } else { Kind::Output };
    (kind, value / 2)
}

fn map_submit(err: SubmitError) -> CopyError {
    match err {
        SubmitError::QueueFull => CopyError::Alloc(AllocError::QueueFull),
        SubmitError::Io(err) => CopyError::Submit(err),
    }
}

/// Fixed buffers registered with `io_uring` up front (`CopyConfig::use_registered_buffers`).
/// Sized to `Qi + Qo`: that is the maximum number of slots that can simultaneously hold a
/// buffer, so a checkout never has to wait for one to free up.
struct BufferPool {
    index_of: HashMap<usize, u16>,
    free: Vec<AlignedBuffer>,
}

impl BufferPool {
    fn checkout(&mut self) -> AlignedBuffer {
        self.free
            .pop()
            .expect("pool sized to Qi + Qo, never exhausted")
    }

    fn index_of(&self, ptr: *const u8) -> u16 {
        self.index_of[&(ptr as usize)]
    }

    fn reclaim(&mut self, buffer: AlignedBuffer) {
        self.free.push(buffer);
    }
}

pub struct Scheduler {
    input: Vec<Slot>,
    output: Vec<Slot>,
    input_seekable: bool,
    output_seekable: bool,
    config: CopyConfig,
    ring: Ring,
    pool: Option<BufferPool>,
    pending: HashMap<usize, i32>,
    ioff: u64,
    read_seq: u64,
    write_seq: u64,
    eof: bool,
    bytes_written: u64,
}

impl Scheduler {
    pub fn new(
        input_side: OpenedSide,
        output_side: OpenedSide,
        config: CopyConfig,
    ) -> Result<Self, CopyError> {
        let input_seekable = input_side.seekable;
        let output_seekable = output_side.seekable;
        let input_depth = input_side.queue_depth() as usize;
        let output_depth = output_side.queue_depth() as usize;

        let input = (0..input_depth)
            .map(|i| Slot::new(input_side.raw_fd(i)))
            .collect();
        let output = (0..output_depth)
            .map(|o| Slot::new(output_side.raw_fd(o)))
            .collect();

        let ring_entries = ((input_depth + output_depth).max(1) as u32).next_power_of_two();
        let ring = Ring::new(ring_entries).map_err(CopyError::Submit)?;

        let pool = if config.use_registered_buffers() {
            Some(Self::build_pool(&ring, &config, input_depth + output_depth)?)
        } else {
            None
        };

        Ok(Self {
            input,
            output,
            input_seekable,
            output_seekable,
            config,
            ring,
            pool,
            pending: HashMap::new(),
            ioff: 0,
            read_seq: 0,
            write_seq: 0,
            eof: false,
            bytes_written: 0,
        })
    }

    /// Allocate and register `count` fixed-size buffers up front for the `ReadFixed`/
    /// `WriteFixed` opt-in path. All buffers share one alignment: a read's buffer can end
    /// up written out through an `O_DIRECT` output descriptor (and vice versa), so both
    /// sides' direct-I/O requirements apply to every buffer in the pool.
    fn build_pool(ring: &Ring, config: &CopyConfig, count: usize) -> Result<BufferPool, CopyError> {
        let align = alignment_for(config.direct_input() || config.direct_output());
        let block_size = config.block_size() as usize;

        let mut buffers = Vec::with_capacity(count);
        let mut iovecs = Vec::with_capacity(count);
        for _ in 0..count {
            let buffer = AlignedBuffer::new(block_size, align)?;
            iovecs.push(libc::iovec {
                iov_base: buffer.as_ptr() as *mut _,
                iov_len: buffer.len(),
            });
            buffers.push(buffer);
        }

        debug_assert!(buffers.len() <= u16::MAX as usize, "too many slots to register");
        // SAFETY: `buffers` live in `self.pool` for the lifetime of the scheduler and are
        // only ever handed to the kernel through the slot they're checked out into; the
        // `io_uring` instance that registered them outlives them too.
        unsafe { ring.register_buffers(&iovecs) }.map_err(CopyError::Submit)?;

        let index_of = buffers
            .iter()
            .enumerate()
            .map(|(index, buffer)| (buffer.as_ptr() as usize, index as u16))
            .collect();
        Ok(BufferPool {
            index_of,
            free: buffers,
        })
    }

    /// Run the scheduler to completion and return a summary of what was copied.
    pub fn run(mut self) -> Result<CopySummary, CopyError> {
        let start = Instant::now();
        loop {
            self.pass_a()?;
            self.pass_b()?;
            if self.terminated() {
                break;
            }
            self.pass_d()?;
        }
        Ok(CopySummary {
            bytes_copied: self.bytes_written,
            elapsed: start.elapsed(),
        })
    }

    fn terminated(&self) -> bool {
        self.eof
            && self.input.iter().all(Slot::is_free)
            && self.output.iter().all(Slot::is_free)
    }

    /// Pass A — drain/advance input slots.
    fn pass_a(&mut self) -> Result<(), CopyError> {
        for i in 0..self.input.len() {
            match self.input[i].status {
                SlotStatus::Ready => continue,
                SlotStatus::InProgress => {
                    if let Some(result) = self.pending.remove(&tag(Kind::Input, i)) {
                        self.apply_input_completion(i, result)?;
                    }
                }
                SlotStatus::Free => {
                    if !self.eof {
                        self.submit_read(i)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Pass B — drain output slots and match ready input slots to idle output slots.
    fn pass_b(&mut self) -> Result<(), CopyError> {
        let mut j = 0usize;
        for o in 0..self.output.len() {
            match self.output[o].status {
                SlotStatus::InProgress => {
                    if let Some(result) = self.pending.remove(&tag(Kind::Output, o)) {
                        self.apply_output_completion(o, result)?;
                    }
                }
                SlotStatus::Ready => {
                    debug_assert!(false, "output slots never enter Ready");
                }
                SlotStatus::Free => {
                    if let Some(i) = self.find_match(j) {
                        j = i + 1;
                        self.submit_write(o, i)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Scan input slots starting at `j` for a `Ready` slot, applying the ordering rule:
    /// a seekable output accepts any `Ready` slot; a non-seekable output only accepts the
    /// slot whose read sequence is exactly `write_seq + 1`. A `Ready` slot that doesn't
    /// qualify is skipped rather than aborting the scan — `io_uring` reads do not complete
    /// in submission order, so the slot actually holding `write_seq + 1` may sit behind a
    /// lower-index slot that finished out of turn, and it must still be reachable.
    fn find_match(&self, j: usize) -> Option<usize> {
        for i in j..self.input.len() {
            if !self.input[i].is_ready() {
                continue;
            }
            if self.output_seekable || self.input[i].seq == self.write_seq + 1 {
                return Some(i);
            }
        }
        None
    }

    /// Drop a slot's buffer, returning it to the registered pool if one is in use instead
    /// of freeing the allocation.
    fn reclaim(&mut self, buffer: Option<AlignedBuffer>) {
        let Some(buffer) = buffer else { return };
        if let Some(pool) = &mut self.pool {
            pool.reclaim(buffer);
        }
    }

    fn submit_read(&mut self, i: usize) -> Result<(), CopyError> {
        let block_size = self.config.block_size();
        let mut buffer = match &mut self.pool {
            Some(pool) => pool.checkout(),
            None => {
                let align = alignment_for(self.config.direct_input() || self.config.direct_output());
                AlignedBuffer::new(block_size as usize, align)?
            }
        };
        let buf_index = self.pool.as_ref().map(|pool| pool.index_of(buffer.as_ptr()));

        let offset = if self.input_seekable { self.ioff } else { 0 };
        let seq = self.read_seq + 1;
        let fd = self.input[i].fd;
        let tag_value = tag(Kind::Input, i);
        let ptr = buffer.as_mut_ptr();

        // SAFETY: `buffer` is moved into the slot immediately below and not touched again
        // until its completion is reaped, matching the exclusive-ownership contract of
        // `Ring::submit_read`.
        unsafe {
            self.ring
                .submit_read(fd, ptr, block_size, offset, tag_value, buf_index)
                .map_err(map_submit)?;
        }

        self.input[i].begin(seq, offset, buffer, tag_value);
        self.read_seq = seq;
        if self.input_seekable {
            self.ioff += block_size as u64;
        }
        log::trace!("input slot {i} submitted read #{seq} at offset {offset}");
        Ok(())
    }

    fn submit_write(&mut self, o: usize, i: usize) -> Result<(), CopyError> {
        let (buffer, filled, input_offset, _input_seq) = self.input[i].take_buffer();
        let offset = if self.output_seekable { input_offset } else { 0 };
        let seq = self.write_seq + 1;
        let fd = self.output[o].fd;
        let tag_value = tag(Kind::Output, o);
        let ptr = buffer.as_ptr();
        let buf_index = self.pool.as_ref().map(|pool| pool.index_of(ptr));

        // SAFETY: `buffer` is moved into the output slot immediately below and not touched
        // again until its completion is reaped.
        unsafe {
            self.ring
                .submit_write(fd, ptr, filled, offset, tag_value, buf_index)
                .map_err(map_submit)?;
        }

        self.write_seq = seq;
        let slot = &mut self.output[o];
        slot.seq = seq;
        slot.offset = offset;
        slot.filled = filled;
        slot.buffer = Some(buffer);
        slot.aio = Some(tag_value);
        slot.status = SlotStatus::InProgress;
        log::trace!("output slot {o} submitted write #{seq} ({filled} bytes) from input slot {i}");
        Ok(())
    }

    fn apply_input_completion(&mut self, i: usize, result: i32) -> Result<(), CopyError> {
        if result < 0 {
            let errno = -result;
            if errno == libc::ECANCELED {
                // Open Question 2: a cancelled read with `filled > 0` discards the partial
                // buffer rather than promoting it to `Ready`.
                log::warn!("input slot {i} cancelled, discarding {} buffered bytes", self.input[i].filled);
                let buffer = self.input[i].buffer.take();
                self.input[i].release();
                self.reclaim(buffer);
                return Ok(());
            }
            return Err(CopyError::Io {
                slot: SlotKind::Input,
                source: io::Error::from_raw_os_error(errno),
            });
        }

        let n = result as u32;
        let block_size = self.config.block_size();
        let slot = &mut self.input[i];

        if n == 0 {
            log::debug!("input slot {i} hit EOF with {} bytes buffered", slot.filled);
            self.eof = true;
            if slot.filled == 0 {
                let buffer = slot.buffer.take();
                slot.release();
                self.reclaim(buffer);
            } else {
                slot.status = SlotStatus::Ready;
            }
            return Ok(());
        }

        slot.filled += n;
        if slot.filled >= block_size {
            slot.status = SlotStatus::Ready;
            return Ok(());
        }
        log::trace!("input slot {i} short read: {} of {} bytes", slot.filled, block_size);

        // Short read: resubmit the remainder on the same slot.
        let remaining = block_size - slot.filled;
        let resume_offset = if self.input_seekable {
            slot.offset + slot.filled as u64
        } else {
            0
        };
        let fd = slot.fd;
        let tag_value = tag(Kind::Input, i);
        let base_ptr = slot
            .buffer
            .as_ref()
            .expect("in-progress slot always holds a buffer")
            .as_ptr();
        let buf_index = self.pool.as_ref().map(|pool| pool.index_of(base_ptr));
        // SAFETY: the buffer remains exclusively owned by this slot; only the unfilled
        // tail is handed to the kernel.
        let ptr = unsafe {
            slot.buffer
                .as_mut()
                .expect("in-progress slot always holds a buffer")
                .as_mut_ptr()
                .add(slot.filled as usize)
        };
        unsafe {
            self.ring
                .submit_read(fd, ptr, remaining, resume_offset, tag_value, buf_index)
                .map_err(map_submit)?;
        }
        Ok(())
    }

    fn apply_output_completion(&mut self, o: usize, result: i32) -> Result<(), CopyError> {
        if result < 0 {
            let errno = -result;
            if errno == libc::ECANCELED {
                log::warn!("output slot {o} cancelled");
                let buffer = self.output[o].buffer.take();
                self.output[o].release();
                self.reclaim(buffer);
                return Ok(());
            }
            if errno == libc::ENOSPC || errno == libc::EFBIG {
                log::warn!("output slot {o} reports destination full (errno {errno})");
                self.eof = true;
                let buffer = self.output[o].buffer.take();
                self.output[o].release();
                self.reclaim(buffer);
                return Ok(());
            }
            return Err(CopyError::Io {
                slot: SlotKind::Output,
                source: io::Error::from_raw_os_error(errno),
            });
        }

        let n = result as u32;
        self.bytes_written += n as u64;

        // Open Question 1: some hosts short-complete a write at device capacity instead
        // of reporting an explicit "destination full" error. Probe residual capacity on a
        // block device before latching `eof` in that case.
        if n < self.output[o].filled
            && self.output_seekable
            && self.is_block_device(self.output[o].fd)?
        {
            log::warn!("output slot {o} short-completed on a block device, latching eof");
            self.eof = true;
        }

        let buffer = self.output[o].buffer.take();
        self.output[o].release();
        self.reclaim(buffer);
        Ok(())
    }

    fn is_block_device(&self, fd: std::os::fd::RawFd) -> Result<bool, CopyError> {
        let stat = nix::sys::stat::fstat(fd).map_err(|errno| CopyError::Io {
            slot: SlotKind::Output,
            source: io::Error::from_raw_os_error(errno as i32),
        })?;
        let mode = nix::sys::stat::SFlag::from_bits_truncate(stat.st_mode);
        Ok(mode.contains(nix::sys::stat::SFlag::S_IFBLK))
    }

    /// Pass D — block briefly on the completion notifier, then reap whatever is ready.
    fn pass_d(&mut self) -> Result<(), CopyError> {
        self.ring
            .wait(self.config.wake_timeout())
            .map_err(CopyError::Submit)?;
        for completion in self.ring.drain() {
            let (_kind, _index) = untag(completion.user_data);
            self.pending.insert(completion.user_data, completion.result);
        }
        Ok(())
    }
}
