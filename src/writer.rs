//! Flow table rendering and per-node file output
//!
//! Output uses the same pipe-separated fixed-column layout as the input
//! noise tables, so generated views load through the same downstream
//! ingest tooling. Each node's files are rendered fully in memory and
//! placed with a temp-file rename; a failed node never leaves a partial
//! file behind and never blocks the other nodes.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use tracing::{error, info};

use crate::error::{GenError, Result};
use crate::record::{FlowRecord, TIME_FORMAT};
use crate::view::GeneratedView;

// Column widths, matching the noise table layout
const W_PROTO: usize = 5;
const W_ADDR: usize = 15;
const W_PORT: usize = 5;
const W_TIME: usize = 23;
const W_COUNT: usize = 10;
const W_DUR: usize = 9;

/// Largest counter value that still fits its column
const MAX_COUNT: u64 = 9_999_999_999;
/// Largest duration that still fits its column (seconds)
const MAX_DURATION: f64 = 99_999.999;

/// Render one record as a table line
fn render_record(record: &FlowRecord, node: &str) -> Result<String> {
    let fail = |msg: String| GenError::Serialization {
        node: node.to_string(),
        msg,
    };

    if record.packets > MAX_COUNT || record.bytes > MAX_COUNT {
        return Err(fail(format!(
            "counter overflows column: packets={} bytes={}",
            record.packets, record.bytes
        )));
    }
    if !record.duration_secs.is_finite()
        || record.duration_secs < 0.0
        || record.duration_secs > MAX_DURATION
    {
        return Err(fail(format!(
            "duration outside renderable range: {}",
            record.duration_secs
        )));
    }

    let mut line = String::with_capacity(96);
    write!(
        line,
        "{:>pw$}|{:>aw$}|{:>ow$}|{:>aw$}|{:>ow$}|{:>tw$}|{:>cw$}|{:>cw$}|{:>dw$.3}|",
        record.protocol.number(),
        record.src_ip,
        record.src_port,
        record.dst_ip,
        record.dst_port,
        record.stime.format(TIME_FORMAT),
        record.packets,
        record.bytes,
        record.duration_secs,
        pw = W_PROTO,
        aw = W_ADDR,
        ow = W_PORT,
        tw = W_TIME,
        cw = W_COUNT,
        dw = W_DUR,
    )
    .expect("writing to String cannot fail");
    Ok(line)
}

fn render_table(records: &[FlowRecord], node: &str) -> Result<String> {
    let mut out = String::with_capacity(records.len() * 96);
    for record in records {
        out.push_str(&render_record(record, node)?);
        out.push('\n');
    }
    Ok(out)
}

/// Render one view's inbound and outbound tables
pub fn render_view(view: &GeneratedView) -> Result<(String, String)> {
    let inbound = render_table(&view.inbound, &view.network)?;
    let outbound = render_table(&view.outbound, &view.network)?;
    Ok((inbound, outbound))
}

/// Write every view's file pair into a fresh output directory.
///
/// The directory must not already exist (existing results are never
/// clobbered). A view that fails to render aborts only that node; the
/// remaining nodes still complete, and the first failure is returned after
/// the sweep.
pub fn write_views<P: AsRef<Path>>(views: &[GeneratedView], outdir: P) -> Result<()> {
    let outdir = outdir.as_ref();
    if outdir.exists() {
        return Err(GenError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("output directory {} already exists", outdir.display()),
        )));
    }
    fs::create_dir_all(outdir)?;

    let mut first_failure: Option<GenError> = None;
    for view in views {
        match write_view(view, outdir) {
            Ok(()) => info!(
                node = %view.network,
                inbound = view.inbound.len(),
                outbound = view.outbound.len(),
                "wrote node output"
            ),
            Err(e) => {
                error!(node = %view.network, "node output failed: {}", e);
                first_failure.get_or_insert(e);
            }
        }
    }

    match first_failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn write_view(view: &GeneratedView, outdir: &Path) -> Result<()> {
    let (inbound, outbound) = render_view(view)?;
    place(outdir, &format!("{}-inbound.txt", view.network), &inbound)?;
    place(outdir, &format!("{}-outbound.txt", view.network), &outbound)?;
    Ok(())
}

/// Write through a temp file and rename into place
fn place(outdir: &Path, name: &str, contents: &str) -> Result<()> {
    let tmp = outdir.join(format!(".{}.tmp", name));
    let path = outdir.join(name);
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, &path)?;
    Ok(())
}
