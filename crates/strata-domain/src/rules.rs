//! Per store path rule files.
//!
//! Each rule names the top-level store path it applies to; rules are
//! matched against that path by plain string equality and then carried in
//! the path's [`PathOptions`].

use std::fs;
use std::path::Path as FsPath;

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::layer::{default_effective, Capability, PathOptions, Perm, Rewrite};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewritePath {
    pub path: String,
    pub regex: String,
    pub repl: String,
}

impl RewritePath {
    /// Parses the `PATH,REGEX,REPLACEMENT` command line form.
    pub fn parse_flag(value: &str) -> Result<Self> {
        let mut parts = value.splitn(3, ',');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(path), Some(regex), Some(repl)) if !path.is_empty() => Ok(Self {
                path: path.to_string(),
                regex: regex.to_string(),
                repl: repl.to_string(),
            }),
            _ => Err(anyhow!(
                "invalid rewrite '{value}', expected PATH,REGEX,REPLACEMENT"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermPath {
    pub path: String,
    pub regex: String,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub uid: u64,
    #[serde(default)]
    pub gid: u64,
    #[serde(default)]
    pub uname: String,
    #[serde(default)]
    pub gname: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityPath {
    pub path: String,
    pub regex: String,
    pub capabilities: Vec<String>,
    #[serde(default = "default_effective")]
    pub effective: bool,
}

/// All rule sets of one invocation.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    pub rewrites: Vec<RewritePath>,
    pub perms: Vec<PermPath>,
    pub capabilities: Vec<CapabilityPath>,
}

impl RuleSet {
    /// Collects the rules attached to `store_path`, or `None` when no rule
    /// names it. When several rewrites name the same path the last one wins.
    pub fn options_for_path(&self, store_path: &str) -> Option<PathOptions> {
        let mut options = PathOptions {
            rewrite: self
                .rewrites
                .iter()
                .rev()
                .find(|rewrite| rewrite.path == store_path)
                .map(|rewrite| Rewrite {
                    regex: rewrite.regex.clone(),
                    repl: rewrite.repl.clone(),
                }),
            ..PathOptions::default()
        };
        options.perms = self
            .perms
            .iter()
            .filter(|perm| perm.path == store_path)
            .map(|perm| Perm {
                regex: perm.regex.clone(),
                mode: perm.mode.clone(),
                uid: perm.uid,
                gid: perm.gid,
                uname: perm.uname.clone(),
                gname: perm.gname.clone(),
            })
            .collect();
        options.capabilities = self
            .capabilities
            .iter()
            .filter(|cap| cap.path == store_path)
            .map(|cap| Capability {
                regex: cap.regex.clone(),
                capabilities: cap.capabilities.clone(),
                effective: cap.effective,
            })
            .collect();
        (!options.is_empty()).then_some(options)
    }
}

fn read_json_array<T: DeserializeOwned>(path: &FsPath, what: &str) -> Result<Vec<T>> {
    let contents =
        fs::read(path).with_context(|| format!("failed to read {what} {}", path.display()))?;
    serde_json::from_slice(&contents)
        .with_context(|| format!("failed to parse {what} {}", path.display()))
}

pub fn read_rewrites_file(path: &FsPath) -> Result<Vec<RewritePath>> {
    read_json_array(path, "rewrite rules")
}

pub fn read_perms_file(path: &FsPath) -> Result<Vec<PermPath>> {
    read_json_array(path, "permission rules")
}

pub fn read_capabilities_file(path: &FsPath) -> Result<Vec<CapabilityPath>> {
    read_json_array(path, "capability rules")
}
