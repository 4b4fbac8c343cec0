//! Release staging.
//!
//! Establishes clean destination and release directories under the
//! release base, runs the release build, optionally folds in the site
//! tarball, verifies the produced file list, and writes a plain-text
//! index of the release directory.
//!
//! DESTDIR and RELEASEDIR are passed to the commands that consume them
//! rather than exported process-wide.

use std::fs;

use anyhow::{Context, Result};

use crate::log::ActionLog;
use crate::pipeline::{site, BuildRequest};
use crate::probe::EnvironmentFacts;
use crate::process::Cmd;

pub fn build(request: &BuildRequest, facts: &EnvironmentFacts, log: &mut ActionLog) -> Result<()> {
    let policy = request.policy();
    let src = &request.source_root;
    let dest_dir = request.release_base.join("dest");
    let release_dir = request.release_base.join("release");
    let dest_str = dest_dir.to_string_lossy().into_owned();
    let release_str = release_dir.to_string_lossy().into_owned();

    log.record("Clearing out old build and release directories.");
    Cmd::new(&request.tools.rm)
        .arg("-rf")
        .arg_path(&dest_dir)
        .policy(policy)
        .run(log)?;
    Cmd::new(&request.tools.rm)
        .arg("-rf")
        .arg_path(&release_dir)
        .policy(policy)
        .run(log)?;

    log.record("Creating clean build and release directories.");
    Cmd::new(&request.tools.mkdir)
        .arg("-p")
        .arg_path(&dest_dir)
        .policy(policy)
        .run(log)?;
    Cmd::new(&request.tools.mkdir)
        .arg("-p")
        .arg_path(&release_dir)
        .policy(policy)
        .run(log)?;

    log.record("Building release.");
    Cmd::new(&request.tools.make)
        .arg("release")
        .current_dir(src.join("etc"))
        .env("DESTDIR", &dest_str)
        .env("RELEASEDIR", &release_str)
        .policy(policy)
        .run(log)?;

    if let Some(site_base) = &request.site_base {
        site::build_site_tarball(&release_dir, site_base, &facts.branch, log)?;
    }

    // checkflist is the step known to fail spuriously; the run's
    // force/interactive policy matters most here.
    log.record("Verifying release.");
    Cmd::new(&request.tools.sh)
        .arg("checkflist")
        .current_dir(src.join("distrib/sets"))
        .env("DESTDIR", &dest_str)
        .env("RELEASEDIR", &release_str)
        .policy(policy)
        .run(log)?;

    log.record("Generating release index.");
    let listing = Cmd::new(&request.tools.ls)
        .arg("-nT")
        .current_dir(&release_dir)
        .policy(policy)
        .run_capture(log)?;
    let index_path = release_dir.join("index.txt");
    fs::write(&index_path, format!("{listing}\n"))
        .with_context(|| format!("writing release index '{}'", index_path.display()))?;

    Ok(())
}
