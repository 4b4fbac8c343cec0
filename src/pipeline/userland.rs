//! Userland build and install.
//!
//! Purge the previous object tree, rebuild object links, create the
//! destination directory skeleton against an empty destination root,
//! then run the full build. Same abort-on-first-fatal-failure contract
//! as the kernel stage.

use std::fs;

use anyhow::{Context, Result};

use crate::log::ActionLog;
use crate::pipeline::BuildRequest;
use crate::probe::EnvironmentFacts;
use crate::process::Cmd;

pub fn build(request: &BuildRequest, facts: &EnvironmentFacts, log: &mut ActionLog) -> Result<()> {
    let jobs = format!("-j{}", request.jobs(facts));
    let policy = request.policy();
    let src = &request.source_root;

    log.record("Building userland.");

    // The shell version of this was `rm -rf /usr/obj/*`; with a
    // structured argv the glob expansion happens here instead.
    let stale = stale_obj_entries(request)?;
    if !stale.is_empty() {
        let mut cmd = Cmd::new(&request.tools.rm).arg("-rf");
        for path in &stale {
            cmd = cmd.arg_path(path);
        }
        cmd.policy(policy).run(log)?;
    }

    Cmd::new(&request.tools.make)
        .arg(&jobs)
        .arg("obj")
        .current_dir(src)
        .policy(policy)
        .run(log)?;

    Cmd::new(&request.tools.make)
        .arg(&jobs)
        .arg("distrib-dirs")
        .current_dir(src.join("etc"))
        .env("DESTDIR", "/")
        .policy(policy)
        .run(log)?;

    Cmd::new(&request.tools.make)
        .arg(&jobs)
        .arg("build")
        .current_dir(src)
        .policy(policy)
        .run(log)?;

    log.record("Userland build complete.");
    Ok(())
}

/// Children of the object tree, sorted for a stable command line. A
/// missing object tree simply means nothing to purge.
fn stale_obj_entries(request: &BuildRequest) -> Result<Vec<std::path::PathBuf>> {
    let obj = &request.obj_root;
    if !obj.is_dir() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    for entry in fs::read_dir(obj)
        .with_context(|| format!("reading object tree '{}'", obj.display()))?
    {
        let entry = entry
            .with_context(|| format!("reading object tree entry under '{}'", obj.display()))?;
        entries.push(entry.path());
    }
    entries.sort();
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostTools;
    use std::path::PathBuf;

    fn request_with_obj(obj_root: PathBuf) -> BuildRequest {
        BuildRequest {
            targets: vec![crate::pipeline::Target::Userland],
            kernel: None,
            arch: None,
            cvs_tag: None,
            cpus: Some(2),
            force: false,
            interactive: false,
            cvs_server: "cvs.example.org".to_string(),
            mirror: "mirror.example.org".to_string(),
            release_base: PathBuf::from("/usr/release"),
            site_base: None,
            source_root: PathBuf::from("/usr/src"),
            obj_root,
            tools: HostTools::default(),
        }
    }

    #[test]
    fn missing_obj_tree_purges_nothing() {
        let request = request_with_obj(PathBuf::from("/nonexistent/obj"));
        assert!(stale_obj_entries(&request).unwrap().is_empty());
    }

    #[test]
    fn obj_children_are_listed_sorted() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("beta")).unwrap();
        fs::write(dir.path().join("alpha"), "x").unwrap();
        let request = request_with_obj(dir.path().to_path_buf());

        let entries = stale_obj_entries(&request).unwrap();
        assert_eq!(
            entries,
            vec![dir.path().join("alpha"), dir.path().join("beta")]
        );
    }
}
