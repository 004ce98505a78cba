use crate::error::Result;
use std::fs::OpenOptions;
use std::io;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the logging system.
///
/// Events always go to stderr; when `log_file` is given they are additionally
/// appended to the run log (truncated first when `clean` is set).
pub fn init(verbose: bool, log_file: Option<&str>, clean: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(io::stderr);

    let registry = tracing_subscriber::registry().with(filter).with(fmt_layer);

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(!clean)
                .truncate(clean)
                .write(true)
                .open(path)?;
            let file_layer = fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(Arc::new(file));
            registry.with(file_layer).init();
        }
        None => registry.init(),
    }

    Ok(())
}
