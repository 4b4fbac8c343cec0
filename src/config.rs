//! Builder configuration.
//!
//! Defaults cover a stock OpenBSD host; an optional TOML file overrides
//! them. Lookup order: an explicit `--config` path, `obsd-builder.toml`
//! in the working directory, then `~/.config/obsd-builder/config.toml`.
//! Command-line flags override whatever the file provides.
//!
//! The `[tools]` table overrides the external tool paths the pipeline
//! invokes. Production runs never need it; tests point the paths at
//! recording shims to assert exact command sequences.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

pub const CONFIG_FILENAME: &str = "obsd-builder.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    pub build: BuildDefaults,
    pub tools: HostTools,
}

/// Defaults for the per-run build parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BuildDefaults {
    /// FQDN/IP address of the anoncvs server for the OpenBSD repo.
    pub cvs_server: String,
    /// Package mirror host for site provisioning.
    pub mirror: String,
    /// Base directory where a release is staged.
    pub release_base: PathBuf,
    /// Directory holding branch-versioned site trees, if any.
    pub site_base: Option<PathBuf>,
    /// Local source checkout.
    pub source_root: PathBuf,
    /// Build object tree purged before userland builds.
    pub obj_root: PathBuf,
}

impl Default for BuildDefaults {
    fn default() -> Self {
        Self {
            cvs_server: "openbsd.cs.toronto.edu".to_string(),
            mirror: "ftp.openbsd.org".to_string(),
            release_base: PathBuf::from("/usr/release"),
            site_base: None,
            source_root: PathBuf::from("/usr/src"),
            obj_root: PathBuf::from("/usr/obj"),
        }
    }
}

/// Paths of the external tools the pipeline invokes.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct HostTools {
    pub cvs: PathBuf,
    pub kernel_config: PathBuf,
    pub make: PathBuf,
    pub sh: PathBuf,
    pub rm: PathBuf,
    pub mkdir: PathBuf,
    pub ls: PathBuf,
    pub sysctl: PathBuf,
    pub uname: PathBuf,
}

impl Default for HostTools {
    fn default() -> Self {
        Self {
            cvs: PathBuf::from("/usr/bin/cvs"),
            kernel_config: PathBuf::from("/usr/sbin/config"),
            make: PathBuf::from("/usr/bin/make"),
            sh: PathBuf::from("/bin/sh"),
            rm: PathBuf::from("/bin/rm"),
            mkdir: PathBuf::from("/bin/mkdir"),
            ls: PathBuf::from("/bin/ls"),
            sysctl: PathBuf::from("/sbin/sysctl"),
            uname: PathBuf::from("/usr/bin/uname"),
        }
    }
}

/// Load configuration, falling back to built-in defaults when no file
/// exists. An explicitly requested file must exist.
pub fn load(explicit: Option<&Path>) -> Result<Config> {
    if let Some(path) = explicit {
        if !path.is_file() {
            bail!("config file '{}' not found", path.display());
        }
        return parse_file(path);
    }

    let local = PathBuf::from(CONFIG_FILENAME);
    if local.is_file() {
        return parse_file(&local);
    }

    if let Some(config_dir) = dirs::config_dir() {
        let user = config_dir.join("obsd-builder").join("config.toml");
        if user.is_file() {
            return parse_file(&user);
        }
    }

    Ok(Config::default())
}

fn parse_file(path: &Path) -> Result<Config> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading config '{}'", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config '{}'", path.display()))
}
