//! Site provisioning: package resolution and the site tarball.
//!
//! A "site" is a locally maintained, branch-versioned tree of custom
//! files layered on top of a stock release. Provisioning resolves a
//! local pattern file against the package mirror's directory listing and
//! emits an `install.site` script; release staging folds the whole site
//! tree into a `site<branch>.tgz` next to the other release sets.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::error::BuildError;
use crate::log::ActionLog;
use crate::pipeline::BuildRequest;
use crate::probe::{Branch, EnvironmentFacts};

const PATTERN_FILENAME: &str = "packages.list";
const INSTALL_SCRIPT_FILENAME: &str = "install.site";
const ARCHIVE_SUFFIX: &str = ".tgz";

static ARCHIVE_LINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"href="([^"/]+\.tgz)""#).expect("archive link pattern is valid"));

/// Resolve site packages against the mirror and emit the install
/// script. A missing pattern file makes the whole stage a no-op.
pub fn provision(request: &BuildRequest, facts: &EnvironmentFacts, log: &mut ActionLog) -> Result<()> {
    let site_base = request
        .site_base
        .as_ref()
        .ok_or(BuildError::MissingSiteBase)?;
    let site_dir = site_base.join(facts.branch.dotted());
    let pattern_path = site_dir.join(PATTERN_FILENAME);

    if !pattern_path.is_file() {
        log.record(format!(
            "No package pattern file at {}. Skipping site package resolution.",
            pattern_path.display()
        ));
        return Ok(());
    }

    let patterns = read_patterns(&pattern_path)?;
    let url = listing_url(&request.mirror, &facts.branch, request.machine_arch(facts));
    log.record(format!("Fetching package listing from {url}"));

    let body = fetch_listing(&url)?;
    let archives = extract_archives(&body);
    if archives.is_empty() {
        return Err(BuildError::PackageListUnavailable {
            url,
            reason: "no package links found in listing".to_string(),
        }
        .into());
    }

    let resolved = resolve_packages(&patterns, &archives);
    log.record(format!("Resolved {} site packages.", resolved.len()));

    let script_path = write_install_script(&site_dir, &url, &resolved)?;
    log.record(format!(
        "Wrote package install script {}.",
        script_path.display()
    ));
    Ok(())
}

/// The mirror's package directory for the running branch and arch.
pub fn listing_url(mirror: &str, branch: &Branch, arch: &str) -> String {
    format!(
        "http://{mirror}/pub/OpenBSD/{}/packages/{arch}/",
        branch.dotted()
    )
}

/// Read prefix patterns, one per line. Blank lines and `#` comments are
/// skipped; order is preserved.
pub fn read_patterns(path: &Path) -> Result<Vec<String>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading package pattern file '{}'", path.display()))?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

fn fetch_listing(url: &str) -> Result<String, BuildError> {
    let unavailable = |reason: String| BuildError::PackageListUnavailable {
        url: url.to_string(),
        reason,
    };

    let response = reqwest::blocking::get(url).map_err(|err| unavailable(err.to_string()))?;
    if !response.status().is_success() {
        return Err(unavailable(format!("HTTP status {}", response.status())));
    }
    response.text().map_err(|err| unavailable(err.to_string()))
}

/// Archive names from the listing's anchor tags, in listing order.
pub fn extract_archives(listing: &str) -> Vec<String> {
    ARCHIVE_LINK_RE
        .captures_iter(listing)
        .map(|capture| capture[1].to_string())
        .collect()
}

/// For each pattern, in file order, every archive whose name starts
/// with it. Case-sensitive; duplicates across patterns are preserved.
pub fn resolve_packages(patterns: &[String], archives: &[String]) -> Vec<String> {
    let mut resolved = Vec::new();
    for pattern in patterns {
        for archive in archives {
            if archive.starts_with(pattern.as_str()) {
                resolved.push(archive.clone());
            }
        }
    }
    resolved
}

/// Write `install.site`: export PKG_PATH, then one pkg_add per resolved
/// archive with the suffix stripped. Mode 0755 so the installer runs it.
pub fn write_install_script(
    site_dir: &Path,
    pkg_path: &str,
    resolved: &[String],
) -> Result<PathBuf> {
    let mut script = String::from("#!/bin/sh\n");
    script.push_str(&format!("export PKG_PATH={pkg_path}\n"));
    for archive in resolved {
        let name = archive.strip_suffix(ARCHIVE_SUFFIX).unwrap_or(archive);
        script.push_str(&format!("pkg_add {name}\n"));
    }

    let path = site_dir.join(INSTALL_SCRIPT_FILENAME);
    fs::write(&path, script)
        .with_context(|| format!("writing install script '{}'", path.display()))?;
    let mut perms = fs::metadata(&path)
        .with_context(|| format!("reading install script metadata '{}'", path.display()))?
        .permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms)
        .with_context(|| format!("marking install script executable '{}'", path.display()))?;
    Ok(path)
}

/// Build `site<digits>.tgz` in the release directory from the
/// branch-versioned site tree, plus a SHA-256 checksum file beside it.
pub fn build_site_tarball(
    release_dir: &Path,
    site_base: &Path,
    branch: &Branch,
    log: &mut ActionLog,
) -> Result<PathBuf> {
    let site_dir = site_base.join(branch.dotted());
    if !site_dir.is_dir() {
        bail!(
            "site directory '{}' not found for branch {}",
            site_dir.display(),
            branch.dotted()
        );
    }

    log.record(format!(
        "Building site tarball rooted at {}",
        site_dir.display()
    ));

    let mut file_count = 0usize;
    for entry in walkdir::WalkDir::new(&site_dir) {
        let entry = entry.context("walking site tree")?;
        if entry.file_type().is_file() {
            file_count += 1;
        }
    }

    let tarball_path = release_dir.join(format!("site{}{ARCHIVE_SUFFIX}", branch.digits()));
    let tarball = fs::File::create(&tarball_path)
        .with_context(|| format!("creating site tarball '{}'", tarball_path.display()))?;
    let encoder = GzEncoder::new(tarball, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);
    builder
        .append_dir_all(".", &site_dir)
        .with_context(|| format!("archiving site tree '{}'", site_dir.display()))?;
    builder
        .into_inner()
        .and_then(|encoder| encoder.finish())
        .with_context(|| format!("finishing site tarball '{}'", tarball_path.display()))?;

    log.record(format!(
        "Site tarball {} contains {file_count} files.",
        tarball_path.display()
    ));

    write_checksum(&tarball_path)?;
    Ok(tarball_path)
}

/// Checksum in `sha256sum -c` format, filename only so verification
/// works from inside the release directory.
fn write_checksum(artifact: &Path) -> Result<PathBuf> {
    let bytes = fs::read(artifact)
        .with_context(|| format!("reading artifact for checksum '{}'", artifact.display()))?;
    let digest = format!("{:x}", Sha256::digest(&bytes));

    let filename = artifact
        .file_name()
        .context("artifact path has no filename")?
        .to_string_lossy();
    let checksum_path = PathBuf::from(format!("{}.sha256", artifact.display()));
    fs::write(&checksum_path, format!("{digest}  {filename}\n"))
        .with_context(|| format!("writing checksum file '{}'", checksum_path.display()))?;
    Ok(checksum_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostTools;
    use flate2::read::GzDecoder;

    const SAMPLE_LISTING: &str = concat!(
        r#"<html><body><a href="../">Parent</a>"#,
        r#"<a href="foo-1.0.tgz">foo-1.0.tgz</a>"#,
        r#"<a href="foobar-2.1.tgz">foobar-2.1.tgz</a>"#,
        r#"<a href="bar-2.0.tgz">bar-2.0.tgz</a>"#,
        r#"<a href="README">README</a></body></html>"#
    );

    fn branch() -> Branch {
        Branch::parse("6.1").unwrap()
    }

    #[test]
    fn archives_are_extracted_in_listing_order() {
        let archives = extract_archives(SAMPLE_LISTING);
        assert_eq!(archives, vec!["foo-1.0.tgz", "foobar-2.1.tgz", "bar-2.0.tgz"]);
    }

    #[test]
    fn listing_without_links_yields_nothing() {
        assert!(extract_archives("<html>nothing here</html>").is_empty());
    }

    #[test]
    fn resolution_is_prefix_based_and_keeps_duplicates() {
        let archives: Vec<String> = vec![
            "foo-1.0.tgz".into(),
            "foobar-2.1.tgz".into(),
            "bar-2.0.tgz".into(),
        ];
        // "foo" matches both foo archives; "foobar" matches one of them
        // again. The duplicate is preserved.
        let patterns: Vec<String> = vec!["foo".into(), "foobar".into()];
        let resolved = resolve_packages(&patterns, &archives);
        assert_eq!(
            resolved,
            vec!["foo-1.0.tgz", "foobar-2.1.tgz", "foobar-2.1.tgz"]
        );
    }

    #[test]
    fn resolution_is_case_sensitive() {
        let archives: Vec<String> = vec!["Foo-1.0.tgz".into()];
        let patterns: Vec<String> = vec!["foo".into()];
        assert!(resolve_packages(&patterns, &archives).is_empty());
    }

    #[test]
    fn pattern_file_skips_blanks_and_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("packages.list");
        fs::write(&path, "# site packages\nfoo\n\n  bar  \n").unwrap();
        assert_eq!(read_patterns(&path).unwrap(), vec!["foo", "bar"]);
    }

    #[test]
    fn install_script_exports_pkg_path_and_strips_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let url = "http://mirror.example.org/pub/OpenBSD/6.1/packages/amd64/";
        let resolved: Vec<String> = vec!["foo-1.0.tgz".into()];

        let path = write_install_script(dir.path(), url, &resolved).unwrap();
        let script = fs::read_to_string(&path).unwrap();
        assert!(script.starts_with("#!/bin/sh\n"));
        assert!(script.contains(&format!("export PKG_PATH={url}")));
        assert!(script.contains("pkg_add foo-1.0\n"));
        assert!(!script.contains(".tgz"));

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn tarball_contains_site_files_and_gets_a_checksum() {
        let site_base = tempfile::tempdir().unwrap();
        let release = tempfile::tempdir().unwrap();
        let site_dir = site_base.path().join("6.1");
        fs::create_dir_all(site_dir.join("etc")).unwrap();
        fs::write(site_dir.join("etc/motd"), "welcome\n").unwrap();

        let mut log = ActionLog::new();
        let tarball =
            build_site_tarball(release.path(), site_base.path(), &branch(), &mut log).unwrap();
        assert_eq!(tarball, release.path().join("site61.tgz"));

        let decoder = GzDecoder::new(fs::File::open(&tarball).unwrap());
        let mut archive = tar::Archive::new(decoder);
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|entry| {
                entry
                    .unwrap()
                    .path()
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        assert!(names.iter().any(|name| name.ends_with("etc/motd")));

        let checksum = fs::read_to_string(release.path().join("site61.tgz.sha256")).unwrap();
        let (digest, filename) = checksum.trim_end().split_once("  ").unwrap();
        assert_eq!(digest.len(), 64);
        assert_eq!(filename, "site61.tgz");
    }

    #[test]
    fn tarball_requires_branch_versioned_site_directory() {
        let site_base = tempfile::tempdir().unwrap();
        let release = tempfile::tempdir().unwrap();
        let mut log = ActionLog::new();
        assert!(
            build_site_tarball(release.path(), site_base.path(), &branch(), &mut log).is_err()
        );
    }

    fn provision_request(mirror: String, site_base: PathBuf) -> BuildRequest {
        BuildRequest {
            targets: vec![crate::pipeline::Target::Site],
            kernel: None,
            arch: None,
            cvs_tag: None,
            cpus: None,
            force: false,
            interactive: false,
            cvs_server: "cvs.example.org".to_string(),
            mirror,
            release_base: PathBuf::from("/usr/release"),
            site_base: Some(site_base),
            source_root: PathBuf::from("/usr/src"),
            obj_root: PathBuf::from("/usr/obj"),
            tools: HostTools::default(),
        }
    }

    fn facts() -> EnvironmentFacts {
        EnvironmentFacts {
            cpu_count: 4,
            kernel_name: "GENERIC.MP".to_string(),
            branch: branch(),
            arch: "amd64".to_string(),
        }
    }

    #[test]
    fn provision_resolves_against_mirror_and_writes_script() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/pub/OpenBSD/6.1/packages/amd64/")
            .with_status(200)
            .with_body(SAMPLE_LISTING)
            .create();

        let site_base = tempfile::tempdir().unwrap();
        let site_dir = site_base.path().join("6.1");
        fs::create_dir_all(&site_dir).unwrap();
        fs::write(site_dir.join("packages.list"), "bar\n").unwrap();

        let request = provision_request(server.host_with_port(), site_base.path().to_path_buf());
        let mut log = ActionLog::new();
        provision(&request, &facts(), &mut log).unwrap();

        mock.assert();
        let script = fs::read_to_string(site_dir.join("install.site")).unwrap();
        assert!(script.contains("pkg_add bar-2.0\n"));
        assert!(!script.contains("pkg_add foo"));
    }

    #[test]
    fn provision_without_pattern_file_is_a_no_op() {
        let site_base = tempfile::tempdir().unwrap();
        fs::create_dir_all(site_base.path().join("6.1")).unwrap();
        let request =
            provision_request("mirror.invalid".to_string(), site_base.path().to_path_buf());
        let mut log = ActionLog::new();
        provision(&request, &facts(), &mut log).unwrap();
        assert!(!site_base.path().join("6.1/install.site").exists());
    }

    #[test]
    fn provision_without_site_base_fails() {
        let mut request = provision_request("mirror.invalid".to_string(), PathBuf::new());
        request.site_base = None;
        let mut log = ActionLog::new();
        let err = provision(&request, &facts(), &mut log).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::MissingSiteBase)
        ));
    }

    #[test]
    fn unreachable_mirror_is_package_list_unavailable() {
        let site_base = tempfile::tempdir().unwrap();
        let site_dir = site_base.path().join("6.1");
        fs::create_dir_all(&site_dir).unwrap();
        fs::write(site_dir.join("packages.list"), "foo\n").unwrap();

        // Reserved TLD; connection always fails without touching a real
        // network.
        let request =
            provision_request("mirror.invalid".to_string(), site_base.path().to_path_buf());
        let mut log = ActionLog::new();
        let err = provision(&request, &facts(), &mut log).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::PackageListUnavailable { .. })
        ));
    }

    #[test]
    fn listing_without_archives_is_package_list_unavailable() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/pub/OpenBSD/6.1/packages/amd64/")
            .with_status(200)
            .with_body("<html>empty listing</html>")
            .create();

        let site_base = tempfile::tempdir().unwrap();
        let site_dir = site_base.path().join("6.1");
        fs::create_dir_all(&site_dir).unwrap();
        fs::write(site_dir.join("packages.list"), "foo\n").unwrap();

        let request = provision_request(server.host_with_port(), site_base.path().to_path_buf());
        let mut log = ActionLog::new();
        let err = provision(&request, &facts(), &mut log).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::PackageListUnavailable { .. })
        ));
    }
}
