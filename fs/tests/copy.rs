//! End-to-end scenarios, numbered to match the scenarios in this crate's design notes.

use {
    blkio::{config::CopyConfig, descriptor::Endpoint, CopySummary},
    std::{
        fs,
        io::{Read, Write},
        os::fd::OwnedFd,
        thread,
    },
    test_case::test_case,
};

fn pattern_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn random_bytes(len: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut buf = vec![0u8; len];
    rand::rng().fill_bytes(&mut buf);
    buf
}

fn run_copy(source: Endpoint, dest: Endpoint, config: CopyConfig) -> CopySummary {
    blkio::copy(source, dest, config).expect("copy should succeed")
}

// S1: empty source, regular destination.
#[test]
fn s1_empty_source_yields_empty_destination() {
    let source = tempfile::NamedTempFile::new().unwrap();
    let dest = tempfile::NamedTempFile::new().unwrap();

    let config = CopyConfig::builder().build().unwrap();
    let summary = run_copy(
        Endpoint::Path {
            path: source.path().to_path_buf(),
            writable: false,
        },
        Endpoint::Path {
            path: dest.path().to_path_buf(),
            writable: true,
        },
        config,
    );

    assert_eq!(summary.bytes_copied, 0);
    assert_eq!(fs::metadata(dest.path()).unwrap().len(), 0);
}

// S2: byte identity across several (blksize, Qi, Qo) tuples, not a multiple of blksize.
#[test_case(1024 * 1024, 4, 4)]
#[test_case(512, 1, 1)]
#[test_case(4096, 8, 3)]
fn s2_byte_identity_seekable_to_seekable(block_size: u32, qi: u32, qo: u32) {
    let len = 3 * 1024 * 1024 + 17;
    let data = pattern_bytes(len);

    let mut source = tempfile::NamedTempFile::new().unwrap();
    source.write_all(&data).unwrap();
    source.flush().unwrap();
    let dest = tempfile::NamedTempFile::new().unwrap();

    let config = CopyConfig::builder()
        .block_size(block_size)
        .max_queue_depth(qi.max(qo))
        .build()
        .unwrap();
    let summary = run_copy(
        Endpoint::Path {
            path: source.path().to_path_buf(),
            writable: false,
        },
        Endpoint::Path {
            path: dest.path().to_path_buf(),
            writable: true,
        },
        config,
    );

    assert_eq!(summary.bytes_copied, len as u64);
    let copied = fs::read(dest.path()).unwrap();
    assert_eq!(copied, data);
}

// S3: a pipe source delivering a short string, clamped to Qi = 1 regardless of the request.
#[test]
fn s3_pipe_source_clamps_to_one_and_preserves_content() {
    let (read_fd, write_fd) = nix::unistd::pipe().unwrap();
    let payload = b"HELLO\n";

    let writer = thread::spawn(move || {
        let mut file = fs::File::from(write_fd);
        file.write_all(payload).unwrap();
        // Dropping `file` closes the write end, delivering EOF to the reader.
    });

    let dest = tempfile::NamedTempFile::new().unwrap();
    let config = CopyConfig::builder()
        .block_size(512)
        .max_queue_depth(32)
        .build()
        .unwrap();

    let source_fd: OwnedFd = read_fd;
    let summary = run_copy(
        Endpoint::Stdio(source_fd),
        Endpoint::Path {
            path: dest.path().to_path_buf(),
            writable: true,
        },
        config,
    );

    writer.join().unwrap();
    assert_eq!(summary.bytes_copied, payload.len() as u64);
    assert_eq!(fs::read(dest.path()).unwrap(), payload);
}

// S4: a regular-file source and a pipe destination with a deliberately slow reader;
// outstanding writes must never exceed 1 because the destination is non-seekable.
#[test]
fn s4_pipe_destination_preserves_order_with_slow_reader() {
    let len = 8 * 1024 * 1024;
    let data = pattern_bytes(len);

    let mut source = tempfile::NamedTempFile::new().unwrap();
    source.write_all(&data).unwrap();
    source.flush().unwrap();

    let (read_fd, write_fd) = nix::unistd::pipe().unwrap();
    let reader = thread::spawn(move || {
        let mut file = fs::File::from(read_fd);
        let mut received = Vec::with_capacity(len);
        let mut chunk = [0u8; 4096];
        loop {
            // Deliberately slow: a tiny sleep models a slow consumer without making the
            // test take unreasonably long.
            thread::sleep(std::time::Duration::from_micros(50));
            let n = file.read(&mut chunk).unwrap();
            if n == 0 {
                break;
            }
            received.extend_from_slice(&chunk[..n]);
        }
        received
    });

    let config = CopyConfig::builder()
        .block_size(64 * 1024)
        .max_queue_depth(16)
        .build()
        .unwrap();
    let dest_fd: OwnedFd = write_fd;
    let summary = run_copy(
        Endpoint::Path {
            path: source.path().to_path_buf(),
            writable: false,
        },
        Endpoint::Stdio(dest_fd),
        config,
    );

    let received = reader.join().unwrap();
    assert_eq!(summary.bytes_copied, len as u64);
    assert_eq!(received, data);
}

// S6: reconfiguration idempotence. Copying forward then back with different (blksize, Q)
// tuples must reproduce the original bytes exactly.
#[test_case(512, 1, 1024 * 1024, 16)]
#[test_case(4096, 4, 8192, 2)]
fn s6_reconfiguration_is_idempotent(bs1: u32, q1: u32, bs2: u32, q2: u32) {
    let original = random_bytes(5 * 1024 * 1024 + 3);

    let mut source = tempfile::NamedTempFile::new().unwrap();
    source.write_all(&original).unwrap();
    source.flush().unwrap();

    let intermediate = tempfile::NamedTempFile::new().unwrap();
    run_copy(
        Endpoint::Path {
            path: source.path().to_path_buf(),
            writable: false,
        },
        Endpoint::Path {
            path: intermediate.path().to_path_buf(),
            writable: true,
        },
        CopyConfig::builder()
            .block_size(bs1)
            .max_queue_depth(q1)
            .build()
            .unwrap(),
    );

    let result = tempfile::NamedTempFile::new().unwrap();
    run_copy(
        Endpoint::Path {
            path: intermediate.path().to_path_buf(),
            writable: false,
        },
        Endpoint::Path {
            path: result.path().to_path_buf(),
            writable: true,
        },
        CopyConfig::builder()
            .block_size(bs2)
            .max_queue_depth(q2)
            .build()
            .unwrap(),
    );

    assert_eq!(fs::read(result.path()).unwrap(), original);
}

// S5: destination reports no space. `/dev/full` always fails writes with `ENOSPC`,
// giving a deterministic stand-in for a capacity-limited block device without requiring
// one. The copy terminates cleanly rather than surfacing an error: `ENOSPC` latches `eof`
// (Open Question 1) instead of propagating as a `CopyError`.
#[test]
fn s5_destination_reports_enospc_and_terminates_cleanly() {
    let data = pattern_bytes(64 * 1024);
    let mut source = tempfile::NamedTempFile::new().unwrap();
    source.write_all(&data).unwrap();
    source.flush().unwrap();

    let config = CopyConfig::builder().block_size(4096).build().unwrap();
    let summary = run_copy(
        Endpoint::Path {
            path: source.path().to_path_buf(),
            writable: false,
        },
        Endpoint::Path {
            path: std::path::PathBuf::from("/dev/full"),
            writable: true,
        },
        config,
    );

    assert_eq!(summary.bytes_copied, 0);
}
