//! Tracing initialization, shared by the fuzzer CLI and by integration
//! tests. The once-only guard is a `std::sync::Once` rather than an
//! `unsafe static mut` flag.

use std::io;
use std::sync::Once;

use tracing::Level;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::writer::MakeWriterExt;

static INIT: Once = Once::new();

#[derive(Debug, Clone)]
pub struct TracingOptions {
    pub debug: bool,
    pub level: Option<Level>,
    /// When set, tracing output rolls daily into this directory in
    /// addition to stdout. When absent, stdout only.
    pub log_dir: Option<String>,
}

impl Default for TracingOptions {
    fn default() -> Self {
        Self {
            debug: false,
            level: None,
            log_dir: None,
        }
    }
}

impl TracingOptions {
    pub fn new_with_debug(debug: bool) -> Self {
        Self {
            debug,
            level: None,
            log_dir: None,
        }
    }

    pub fn new_with_log_dir(debug: bool, log_dir: Option<String>) -> Self {
        Self {
            debug,
            level: None,
            log_dir,
        }
    }
}

/// Initializes the global `tracing` subscriber exactly once per
/// process. Subsequent calls are no-ops.
pub fn init(opts: TracingOptions) {
    INIT.call_once(|| {
        let level = opts.level.unwrap_or(if opts.debug {
            Level::DEBUG
        } else {
            Level::INFO
        });

        let result = match &opts.log_dir {
            None => fmt()
                .with_max_level(level)
                .with_target(false)
                .with_thread_ids(true)
                .compact()
                .try_init(),
            Some(dir) => {
                let file_appender = tracing_appender::rolling::daily(dir, "changeset.log");
                let writer = file_appender.and(io::stdout);
                fmt()
                    .with_max_level(level)
                    .with_target(false)
                    .with_thread_ids(true)
                    .compact()
                    .with_writer(writer)
                    .try_init()
            }
        };

        // Fails only if a subscriber was already installed by the
        // embedding application; that's fine, we just keep theirs.
        let _ = result;
    });
}
