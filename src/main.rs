//! keyspace-walker - Browse a flat key-value keyspace as a tree
//!
//! Entry point for the CLI application.

use anyhow::{bail, Context, Result};
use clap::Parser;
use keyspace_walker::config::{BrowseConfig, CliArgs, Operation};
use keyspace_walker::datasource::{DataSource, DeletionEvent, Registry};
use keyspace_walker::delivery::{DataBatch, Delivery};
use keyspace_walker::progress::{
    print_deletion_summary, print_header, print_scan_summary, ProgressReporter,
};
use keyspace_walker::tree::LevelWindow;
use serde::Serialize;
use std::io::{self, BufWriter, Write};
use std::process::ExitCode;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Setup logging
    setup_logging(args.verbose)?;

    // Validate and create config
    let config = BrowseConfig::from_args(args).context("Invalid configuration")?;

    if config.show_progress {
        print_header(
            &config.descriptor.bootstrap,
            &config.descriptor.vendor,
            config.descriptor.read_only,
            &config.settings,
        );
    }

    let registry = Registry::with_default_vendors(config.settings);
    let id = registry
        .create_data_source(&config.descriptor)
        .with_context(|| format!("Failed to open '{}'", config.descriptor.bootstrap))?;
    let source = registry.get(&id)?;

    let result = run_operation(&source, &config);
    registry.shutdown();
    result
}

fn run_operation(source: &DataSource, config: &BrowseConfig) -> Result<()> {
    match &config.operation {
        Operation::Tree { filter, window } => list_tree(source, config, filter, *window),
        Operation::Info { key } => {
            let infos = source
                .entry_point_infos(key)
                .with_context(|| format!("Failed to inspect '{key}'"))?;
            print_json(&infos)
        }
        Operation::Content { key, filter } => {
            let batch = source
                .content(key, filter)
                .with_context(|| format!("Failed to read '{key}'"))?;
            print_json(&batch)
        }
        Operation::Delete { key } => {
            let status = source
                .delete_entry_point(key)
                .with_context(|| format!("Failed to delete '{key}'"))?;
            print_json(&serde_json::json!({ "key": key, "status": status }))
        }
        Operation::DeleteChildren { prefix } => delete_children(source, config, prefix),
        Operation::Nodes => {
            let info = source.cluster_infos().context("Failed to read topology")?;
            print_json(&info)
        }
        Operation::Exec { args, node } => {
            let reply = source
                .execute_command(args, node.as_deref())
                .with_context(|| format!("Command '{}' failed", args.join(" ")))?;
            print_json(&reply)
        }
        Operation::Status => {
            let state = source.status().context("Failed to read status")?;
            print_json(&state)
        }
    }
}

/// Scan, then print every node as one JSON line
fn list_tree(
    source: &DataSource,
    config: &BrowseConfig,
    filter: &str,
    window: LevelWindow,
) -> Result<()> {
    let progress = config.show_progress.then(ProgressReporter::new);
    if let Some(ref p) = progress {
        p.set_status("Scanning keyspace...");
    }

    let listing = match progress {
        Some(ref p) => {
            source.list_entry_points_with_progress(filter, window, |stats| p.update(&stats))
        }
        None => source.list_entry_points(filter, window),
    }
    .context("Scan failed")?;

    if let Some(ref p) = progress {
        p.finish_and_clear();
    }

    let status = listing.delivery.status();
    let stdout = io::stdout();
    let mut out = CountingWriter::new(BufWriter::new(stdout.lock()));

    match listing.delivery {
        Delivery::Completed(batches) => {
            for batch in &batches {
                write_batch(&mut out, batch)?;
            }
        }
        Delivery::Moved(mut handle) => {
            info!(stream = %handle.id(), "Result streamed");
            for batch in handle.by_ref() {
                write_batch(&mut out, &batch)?;
            }
            let stats = handle.stats();
            debug!(
                stream = %handle.id(),
                batches = stats.throughput(),
                backpressure = stats.backpressure_count(),
                "Stream drained"
            );
            handle.join().context("Stream producer failed")?;
        }
    }
    out.flush()?;

    if config.show_progress {
        print_scan_summary(
            listing.nodes,
            &listing.stats,
            listing.duration,
            status,
            out.written,
        );
    }
    Ok(())
}

fn delete_children(source: &DataSource, config: &BrowseConfig, prefix: &str) -> Result<()> {
    let handle = source
        .delete_entry_point_children(prefix)
        .with_context(|| format!("Failed to delete children of '{prefix}'"))?;
    info!(deletion = %handle.id(), prefix = %prefix, "Deletion started");

    let progress = config.show_progress.then(ProgressReporter::new);
    if let Some(ref p) = progress {
        p.set_status(&format!("Deleting children of '{prefix}'..."));
    }

    let (last, failures) = handle.wait()?;

    if let Some(ref p) = progress {
        match &last {
            DeletionEvent::Finished(report) => p.finish(&format!(
                "Deleted {} of {} key(s)",
                report.deleted, report.requested
            )),
            _ => p.finish("Deletion aborted"),
        }
    }
    for failure in &failures {
        if let DeletionEvent::Failed { key, error } = failure {
            eprintln!("Failed to delete '{key}': {error}");
        }
    }

    match last {
        DeletionEvent::Finished(report) => {
            if config.show_progress {
                print_deletion_summary(&report);
            }
            print_json(&report)?;
            if report.failed > 0 {
                bail!("{} key(s) could not be deleted", report.failed);
            }
            Ok(())
        }
        DeletionEvent::Aborted { reason } => bail!("Deletion aborted: {reason}"),
        DeletionEvent::Failed { key, error } => bail!("Failed to delete '{key}': {error}"),
    }
}

fn write_batch<W: Write>(out: &mut W, batch: &DataBatch) -> Result<()> {
    for record in &batch.data {
        serde_json::to_writer(&mut *out, record)?;
        out.write_all(b"\n")?;
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}

/// Writer wrapper counting bytes written
struct CountingWriter<W> {
    inner: W,
    written: u64,
}

impl<W: Write> CountingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("keyspace_walker=debug,warn")
    } else {
        EnvFilter::new("keyspace_walker=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}
