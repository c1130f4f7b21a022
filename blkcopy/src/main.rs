use {
    anyhow::{Context, Result},
    blkio::{config::CopyConfig, descriptor::Endpoint, error::CopyError},
    clap::Parser,
    log::error,
    std::{
        os::fd::{FromRawFd, OwnedFd},
        path::PathBuf,
        process::ExitCode,
    },
};

/// Block-oriented file copier driven by a dual-queue io_uring scheduler.
#[derive(Parser, Debug)]
#[command(name = "blkcopy", version, about)]
struct Cli {
    /// Source path; omitted means standard input (non-seekable)
    source: Option<PathBuf>,

    /// Destination path; omitted means standard output (non-seekable)
    dest: Option<PathBuf>,

    /// Bytes per block, must be a multiple of 512
    #[arg(short, long, default_value_t = 1024 * 1024)]
    block_size: u32,

    /// Maximum in-flight operations per direction
    #[arg(short, long, default_value_t = 16)]
    queue_depth: u32,

    /// Open the source with O_DIRECT (ignored if the source is non-seekable)
    #[arg(long)]
    direct_input: bool,

    /// Open the destination with O_DIRECT (ignored if the destination is non-seekable)
    #[arg(long)]
    direct_output: bool,

    /// Register buffers with io_uring for fixed-buffer reads/writes
    #[arg(long)]
    registered_buffers: bool,

    /// Raise the log level to debug
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.verbose {
        // SAFETY: single-threaded at this point, before any other code reads the environment.
        unsafe { std::env::set_var("RUST_LOG", "debug") };
    } else if std::env::var_os("RUST_LOG").is_none() {
        // SAFETY: single-threaded at this point, before any other code reads the environment.
        unsafe { std::env::set_var("RUST_LOG", "info") };
    }
    env_logger::init();

    match try_main(cli) {
        Ok(summary) => {
            eprintln!("{summary}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{err:?}");
            ExitCode::from(exit_code(&err))
        }
    }
}

fn try_main(cli: Cli) -> Result<blkio::CopySummary> {
    let config = CopyConfig::builder()
        .block_size(cli.block_size)
        .max_queue_depth(cli.queue_depth)
        .direct_input(cli.direct_input)
        .direct_output(cli.direct_output)
        .use_registered_buffers(cli.registered_buffers)
        .build()
        .context("invalid configuration")?;

    let source = resolve(cli.source, false, libc::STDIN_FILENO);
    let dest = resolve(cli.dest, true, libc::STDOUT_FILENO);

    blkio::copy(source, dest, config).context("copy failed")
}

fn resolve(path: Option<PathBuf>, writable: bool, stdio_fd: i32) -> Endpoint {
    match path {
        Some(path) => Endpoint::Path { path, writable },
        // SAFETY: `stdio_fd` (0 or 1) is a valid, open descriptor for the life of the process.
        None => Endpoint::Stdio(unsafe { OwnedFd::from_raw_fd(stdio_fd) }),
    }
}

/// Best-effort mapping from a top-level failure to an exit code, per `spec.md` §6: `1` for
/// usage errors, distinct nonzero codes for I/O vs. allocation failures.
fn exit_code(err: &anyhow::Error) -> u8 {
    match err.chain().find_map(|cause| cause.downcast_ref::<CopyError>()) {
        Some(copy_err) => copy_err.exit_code() as u8,
        None => 1,
    }
}
