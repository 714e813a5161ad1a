use std::borrow::Cow;

use regex::Regex;
use strata_domain::{Capability, Perm, PathOptions};

use crate::capability::{capability_mask, VfsCapData};
use crate::error::BuildError;

pub const DEFAULT_OWNER: &str = "root";

/// Header ownership and mode a perm rule may override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ownership {
    pub mode: u32,
    pub uid: u64,
    pub gid: u64,
    pub uname: String,
    pub gname: String,
}

impl Ownership {
    pub fn root(mode: u32) -> Self {
        Self {
            mode,
            uid: 0,
            gid: 0,
            uname: DEFAULT_OWNER.to_string(),
            gname: DEFAULT_OWNER.to_string(),
        }
    }
}

#[derive(Debug)]
struct CompiledRewrite {
    regex: Regex,
    repl: String,
}

#[derive(Debug)]
struct CompiledPerm {
    regex: Regex,
    mode: Option<u32>,
    uid: u64,
    gid: u64,
    uname: Option<String>,
    gname: Option<String>,
}

#[derive(Debug)]
struct CompiledCapability {
    regex: Regex,
    data: VfsCapData,
}

/// The rules of one top-level path with every regex compiled up front.
#[derive(Debug)]
pub struct CompiledOptions {
    source: PathOptions,
    rewrite: Option<CompiledRewrite>,
    perms: Vec<CompiledPerm>,
    capabilities: Vec<CompiledCapability>,
}

impl CompiledOptions {
    /// Compiles `options`, which belong to the top-level path `path`.
    pub fn compile(path: &str, options: &PathOptions) -> Result<Self, BuildError> {
        let rule_error = |message: String| BuildError::Rule {
            path: path.to_string(),
            message,
        };
        let compile_regex = |pattern: &str| {
            Regex::new(pattern).map_err(|err| rule_error(format!("invalid regex '{pattern}': {err}")))
        };

        let rewrite = match &options.rewrite {
            Some(rewrite) if !rewrite.regex.is_empty() => Some(CompiledRewrite {
                regex: compile_regex(&rewrite.regex)?,
                repl: rewrite.repl.clone(),
            }),
            _ => None,
        };
        let perms = options
            .perms
            .iter()
            .map(|perm| {
                Ok(CompiledPerm {
                    regex: compile_regex(&perm.regex)?,
                    mode: parse_mode(&perm.mode).map_err(rule_error)?,
                    uid: perm.uid,
                    gid: perm.gid,
                    uname: non_empty(&perm.uname),
                    gname: non_empty(&perm.gname),
                })
            })
            .collect::<Result<Vec<_>, BuildError>>()?;
        let capabilities = options
            .capabilities
            .iter()
            .map(|cap| {
                let mask = capability_mask(&cap.capabilities)
                    .map_err(|name| rule_error(format!("unknown capability '{name}'")))?;
                Ok(CompiledCapability {
                    regex: compile_regex(&cap.regex)?,
                    data: VfsCapData::new(mask, mask, cap.effective),
                })
            })
            .collect::<Result<Vec<_>, BuildError>>()?;

        Ok(Self {
            source: options.clone(),
            rewrite,
            perms,
            capabilities,
        })
    }

    /// Maps a source path to its destination; an empty result drops the file.
    pub fn rewrite<'a>(&self, path: &'a str) -> Cow<'a, str> {
        match &self.rewrite {
            Some(rewrite) => rewrite.regex.replace_all(path, rewrite.repl.as_str()),
            None => Cow::Borrowed(path),
        }
    }

    /// Applies every perm rule matching `source`; later rules override earlier ones.
    pub fn apply_perms(&self, source: &str, ownership: &mut Ownership) {
        for perm in self.perms.iter().filter(|perm| perm.regex.is_match(source)) {
            ownership.uid = perm.uid;
            ownership.gid = perm.gid;
            if let Some(uname) = &perm.uname {
                ownership.uname.clone_from(uname);
            }
            if let Some(gname) = &perm.gname {
                ownership.gname.clone_from(gname);
            }
            if let Some(mode) = perm.mode {
                ownership.mode = mode;
            }
        }
    }

    /// Capability data of the last capability rule matching `source`.
    pub fn capability_for(&self, source: &str) -> Option<VfsCapData> {
        self.capabilities
            .iter()
            .rev()
            .find(|cap| cap.regex.is_match(source))
            .map(|cap| cap.data)
    }

    pub fn perms(&self) -> &[Perm] {
        &self.source.perms
    }

    pub fn capabilities(&self) -> &[Capability] {
        &self.source.capabilities
    }
}

/// Names the first rule set differing between two nodes' options, if any.
pub(crate) fn differing_rules(
    existing: Option<&CompiledOptions>,
    incoming: Option<&CompiledOptions>,
) -> Option<(&'static str, String, String)> {
    let (old_perms, new_perms) = (perms_of(existing), perms_of(incoming));
    if !same_perms(old_perms, new_perms) {
        return Some(("perms", format!("{old_perms:?}"), format!("{new_perms:?}")));
    }
    let (old_caps, new_caps) = (capabilities_of(existing), capabilities_of(incoming));
    if !same_capabilities(old_caps, new_caps) {
        return Some((
            "capabilities",
            format!("{old_caps:?}"),
            format!("{new_caps:?}"),
        ));
    }
    None
}

fn perms_of(options: Option<&CompiledOptions>) -> &[Perm] {
    options.map_or(&[][..], CompiledOptions::perms)
}

fn capabilities_of(options: Option<&CompiledOptions>) -> &[Capability] {
    options.map_or(&[][..], CompiledOptions::capabilities)
}

fn same_perms(left: &[Perm], right: &[Perm]) -> bool {
    left.len() == right.len()
        && left.iter().zip(right).all(|(a, b)| {
            a.regex == b.regex
                && a.mode == b.mode
                && a.uid == b.uid
                && a.gid == b.gid
                && a.uname == b.uname
                && a.gname == b.gname
        })
}

fn same_capabilities(left: &[Capability], right: &[Capability]) -> bool {
    left.len() == right.len()
        && left.iter().zip(right).all(|(a, b)| {
            a.regex == b.regex && a.capabilities == b.capabilities && a.effective == b.effective
        })
}

fn parse_mode(raw: &str) -> Result<Option<u32>, String> {
    if raw.is_empty() {
        return Ok(None);
    }
    let digits = raw.strip_prefix("0o").unwrap_or(raw);
    match u32::from_str_radix(digits, 8) {
        Ok(mode) if mode <= 0o7777 => Ok(Some(mode)),
        _ => Err(format!("invalid octal mode '{raw}'")),
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}
