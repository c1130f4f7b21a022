//! Seekability classification and per-side descriptor setup (§4.5).
//!
//! A regular file or block device is seekable; anything else (pipe, FIFO, character
//! device, standard stream) is not. Seekable sides get one independently-opened
//! descriptor per slot, because the asynchronous I/O primitive takes the offset as a
//! per-request argument but some kernels still share a file-position cursor across
//! `dup`'d descriptors. Non-seekable sides use the single inherited descriptor and are
//! hard-clamped to a queue depth of 1.

use {
    nix::sys::stat::{fstat, SFlag},
    std::{
        fs::{File, OpenOptions},
        io,
        os::{fd::{AsRawFd, OwnedFd, RawFd}, unix::fs::OpenOptionsExt},
        path::{Path, PathBuf},
    },
};

/// How a side of the copy was specified by the collaborator layer (CLI).
pub enum Endpoint {
    /// A filesystem path. `writable` distinguishes source (read-only) from destination
    /// (read-write, created/truncated per `spec.md` §6's persisted-state rule).
    Path { path: PathBuf, writable: bool },
    /// The process's own standard stream; always non-seekable by construction.
    Stdio(OwnedFd),
}

/// One side's resolved descriptors, ready to be handed to the scheduler.
pub struct OpenedSide {
    pub seekable: bool,
    /// One descriptor per slot when `seekable`; exactly one entry otherwise.
    descriptors: Vec<Descriptor>,
}

impl OpenedSide {
    pub fn queue_depth(&self) -> u32 {
        self.descriptors.len() as u32
    }

    pub fn raw_fd(&self, slot: usize) -> RawFd {
        let index = if self.seekable { slot } else { 0 };
        self.descriptors[index].as_raw_fd()
    }
}

enum Descriptor {
    Owned(File),
    Borrowed(OwnedFd),
}

impl Descriptor {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Descriptor::Owned(file) => file.as_raw_fd(),
            Descriptor::Borrowed(fd) => fd.as_raw_fd(),
        }
    }
}

fn classify(fd: RawFd) -> io::Result<bool> {
    let stat = fstat(fd).map_err(|errno| io::Error::from_raw_os_error(errno as i32))?;
    let mode = SFlag::from_bits_truncate(stat.st_mode);
    Ok(mode.contains(SFlag::S_IFREG) || mode.contains(SFlag::S_IFBLK))
}

fn open_one(path: &Path, writable: bool, direct: bool, create: bool) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.read(true);
    if writable {
        options.write(true);
        if create {
            options.create(true).truncate(true);
        }
    }
    if direct {
        options.custom_flags(libc::O_DIRECT);
    }
    options.open(path)
}

/// Open `slots` descriptors for one side, clamping to 1 and disabling direct I/O when the
/// side turns out to be non-seekable (pipes, FIFOs, character devices, standard streams).
///
/// `slots` is the queue depth already clamped to `[1, 32]` by [`crate::config`]; this
/// function applies the seekability clamp from §4.5 on top of it.
pub fn open_side(endpoint: Endpoint, slots: u32, direct: bool) -> io::Result<OpenedSide> {
    match endpoint {
        Endpoint::Stdio(fd) => Ok(OpenedSide {
            seekable: false,
            descriptors: vec![Descriptor::Borrowed(fd)],
        }),
        Endpoint::Path { path, writable } => {
            // Classify first without O_DIRECT: a non-seekable target (a FIFO, say) may
            // reject that flag outright, and direct I/O is disabled on non-seekable sides
            // regardless (§4.5). The probe open also creates/truncates the destination.
            let probe = open_one(&path, writable, false, writable)?;
            let seekable = classify(probe.as_raw_fd())?;

            if !seekable {
                return Ok(OpenedSide {
                    seekable: false,
                    descriptors: vec![Descriptor::Owned(probe)],
                });
            }

            // Seekable: reopen every slot's descriptor (including the first) with the
            // requested direct-I/O flag, now that classification is settled. `create` is
            // false here — the probe open above already created/truncated the destination,
            // and a second `create`/`truncate` would race the first writer.
            drop(probe);
            let mut descriptors = Vec::with_capacity(slots as usize);
            for _ in 0..slots {
                descriptors.push(Descriptor::Owned(open_one(&path, writable, direct, false)?));
            }
            Ok(OpenedSide {
                seekable: true,
                descriptors,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regular_file_is_seekable() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let side = open_side(
            Endpoint::Path {
                path: tmp.path().to_path_buf(),
                writable: false,
            },
            4,
            false,
        )
        .unwrap();
        assert!(side.seekable);
        assert_eq!(side.queue_depth(), 4);
    }

    #[test]
    fn fifo_is_non_seekable_and_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let fifo_path = dir.path().join("fifo");
        nix::unistd::mkfifo(&fifo_path, nix::sys::stat::Mode::S_IRWXU).unwrap();

        // Keep a non-blocking reader open so the write-side open inside `open_side`
        // (which otherwise blocks until a reader is present) completes immediately.
        let _reader = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&fifo_path)
            .unwrap();

        let side = open_side(
            Endpoint::Path {
                path: fifo_path,
                writable: true,
            },
            32,
            false,
        )
        .unwrap();
        assert!(!side.seekable);
        assert_eq!(side.queue_depth(), 1);
    }
}
