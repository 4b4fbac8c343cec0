//! Source tree sync against the anoncvs server.
//!
//! Two branches, no intermediate states: no local checkout marker means
//! an initial checkout; a marker means an update of the existing tree.
//! A requested tag that conflicts with the recorded one is a hard error,
//! never a migration.

use std::ffi::CString;
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use anyhow::{Context, Result};

use crate::error::BuildError;
use crate::log::ActionLog;
use crate::pipeline::BuildRequest;
use crate::process::Cmd;

/// Checkout or update the local source tree.
pub fn sync(request: &BuildRequest, log: &mut ActionLog) -> Result<()> {
    let src = &request.source_root;
    let parent = src.parent().unwrap_or_else(|| Path::new("/"));

    // Checked before any network activity.
    if !writable(parent) && !writable(src) {
        log.record(format!(
            "Not enough write permissions to checkout/update local CVS checkout in {}.",
            src.display()
        ));
        return Err(BuildError::InsufficientPermissions { path: src.clone() }.into());
    }

    let server_path = format!("anoncvs@{}:/cvs", request.cvs_server);
    let marker = src.join("CVS/Tag");

    if !marker.exists() {
        log.record("No CVS checkout found. Attempting checkout now.");
        let mut cmd = Cmd::new(&request.tools.cvs).args(["-d", &server_path, "checkout"]);
        if let Some(tag) = request.tag_filter() {
            cmd = cmd.arg(format!("-r{tag}"));
        }
        cmd.args(["-P", "src"]).current_dir(parent).run(log)?;
        return Ok(());
    }

    let local_tag = read_checkout_tag(&marker)?;
    if let Some(requested) = request.tag_filter() {
        if requested != local_tag {
            log.record("Upgrading across versions via source is not suggested.");
            log.record("See: http://www.openbsd.org/faq/faq5.html#BldBinary");
            return Err(BuildError::TagMismatch {
                requested: requested.to_string(),
                checked_out: local_tag,
            }
            .into());
        }
    }

    log.record(format!(
        "CVS checkout found for branch {local_tag}. Executing update."
    ));
    let mut cmd = Cmd::new(&request.tools.cvs).args(["-d", &server_path, "up"]);
    if let Some(tag) = request.tag_filter() {
        cmd = cmd.arg(format!("-r{tag}"));
    }
    cmd.arg("-Pd").current_dir(src).run(log)?;
    Ok(())
}

/// Read the tag from a `CVS/Tag` marker. The first byte is the CVS
/// sentinel (T for branch/tag, N for non-branch, D for date) and is
/// skipped.
pub fn read_checkout_tag(marker: &Path) -> Result<String> {
    let raw = fs::read_to_string(marker)
        .with_context(|| format!("reading CVS tag marker '{}'", marker.display()))?;
    let first_line = raw.lines().next().unwrap_or("");
    Ok(first_line.get(1..).unwrap_or("").trim().to_string())
}

fn writable(path: &Path) -> bool {
    match CString::new(path.as_os_str().as_bytes()) {
        Ok(c_path) => unsafe { libc::access(c_path.as_ptr(), libc::W_OK) == 0 },
        Err(_) => false,
    }
}
