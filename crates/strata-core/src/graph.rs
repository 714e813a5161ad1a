//! Destination file tree assembled from one or more walked store paths.
//!
//! The graph describes the layout of the tar stream, not of the source
//! filesystem: case-hack suffixes and rewrite rules are applied while files
//! are inserted, and children are keyed by their destination name so the
//! serializer can visit them in sorted order.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;
use walkdir::WalkDir;

use crate::error::BuildError;
use crate::options::{differing_rules, CompiledOptions};

const CASE_HACK_SUFFIX: &str = "~nix~case~hack~";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
    Other,
}

impl FileKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Regular => "regular",
            Self::Directory => "directory",
            Self::Symlink => "symlink",
            Self::Other => "other",
        }
    }
}

/// The subset of file metadata that reaches the tar headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    pub kind: FileKind,
    /// Permission bits, including setuid, setgid and sticky.
    pub mode: u32,
    pub size: u64,
}

impl FileInfo {
    pub fn from_metadata(metadata: &fs::Metadata) -> Self {
        let file_type = metadata.file_type();
        let kind = if file_type.is_symlink() {
            FileKind::Symlink
        } else if file_type.is_dir() {
            FileKind::Directory
        } else if file_type.is_file() {
            FileKind::Regular
        } else {
            FileKind::Other
        };
        Self {
            kind,
            mode: permission_bits(metadata),
            size: if kind == FileKind::Regular {
                metadata.len()
            } else {
                0
            },
        }
    }
}

#[cfg(unix)]
fn permission_bits(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(metadata: &fs::Metadata) -> u32 {
    match (metadata.is_dir(), metadata.permissions().readonly()) {
        (true, _) => 0o755,
        (false, true) => 0o444,
        (false, false) => 0o644,
    }
}

type NodeId = usize;

#[derive(Debug, Default)]
struct FileNode {
    source: Option<String>,
    info: Option<FileInfo>,
    options: Option<Arc<CompiledOptions>>,
    children: BTreeMap<String, NodeId>,
}

/// One node as seen by [`FileGraph::walk`]. Nodes without `info` are
/// directories that were created implicitly as parents of walked files.
#[derive(Debug, Clone, Copy)]
pub struct GraphEntry<'a> {
    pub destination: &'a str,
    pub source: Option<&'a str>,
    pub info: Option<&'a FileInfo>,
    pub options: Option<&'a CompiledOptions>,
}

#[derive(Debug)]
pub struct FileGraph {
    nodes: Vec<FileNode>,
    case_hack: bool,
}

impl FileGraph {
    pub fn new(case_hack: bool) -> Self {
        Self {
            nodes: vec![FileNode::default()],
            case_hack,
        }
    }

    /// Walks `root` without following symlinks and adds every entry.
    pub fn add_path(
        &mut self,
        root: &Path,
        options: Option<&Arc<CompiledOptions>>,
    ) -> Result<(), BuildError> {
        let walker = WalkDir::new(root)
            .follow_links(false)
            .follow_root_links(false)
            .sort_by_file_name();
        for entry in walker {
            let entry = entry.map_err(|err| BuildError::Walk {
                path: err.path().unwrap_or(root).to_path_buf(),
                source: err,
            })?;
            let metadata = entry.metadata().map_err(|err| BuildError::Walk {
                path: entry.path().to_path_buf(),
                source: err,
            })?;
            let source = entry.path().to_str().ok_or_else(|| BuildError::Unsupported {
                path: entry.path().to_path_buf(),
                reason: "path is not valid UTF-8".to_string(),
            })?;
            debug!(path = source, "walking filesystem");
            self.add_file(source, FileInfo::from_metadata(&metadata), options)?;
        }
        Ok(())
    }

    /// Inserts one file at the destination derived from `source`.
    pub fn add_file(
        &mut self,
        source: &str,
        info: FileInfo,
        options: Option<&Arc<CompiledOptions>>,
    ) -> Result<(), BuildError> {
        let cleaned = if self.case_hack {
            remove_case_hack_suffix(source)
        } else {
            source.to_string()
        };
        let destination = match options {
            Some(options) => options.rewrite(&cleaned).into_owned(),
            None => cleaned,
        };
        if destination.is_empty() {
            return Ok(());
        }

        let mut current = 0;
        for part in split_path(&destination) {
            current = match self.nodes[current].children.get(&part) {
                Some(&child) => child,
                None => {
                    let child = self.nodes.len();
                    self.nodes.push(FileNode::default());
                    self.nodes[current].children.insert(part, child);
                    child
                }
            };
        }

        let node = &mut self.nodes[current];
        let both_directories = |existing: &FileInfo| {
            existing.kind == FileKind::Directory && info.kind == FileKind::Directory
        };
        // Directories never conflict, whatever rules they carry.
        if let Some(existing) = node.info.as_ref().filter(|existing| !both_directories(existing)) {
            let conflict = |attribute: &'static str, old: String, new: String| BuildError::Conflict {
                destination: destination.clone(),
                attribute,
                existing: old,
                existing_source: node.source.clone().unwrap_or_default(),
                incoming: new,
                incoming_source: source.to_string(),
            };
            if let Some((attribute, old, new)) = metadata_difference(existing, &info) {
                return Err(conflict(attribute, old, new));
            }
            if let Some((attribute, old, new)) =
                differing_rules(node.options.as_deref(), options.map(Arc::as_ref))
            {
                return Err(conflict(attribute, old, new));
            }
        }
        node.info = Some(info);
        node.options = options.cloned();
        node.source = Some(source.to_string());
        Ok(())
    }

    /// Visits every node depth-first, children sorted by destination name.
    pub fn walk<E>(
        &self,
        mut visit: impl FnMut(GraphEntry<'_>) -> Result<(), E>,
    ) -> Result<(), E> {
        self.walk_from(0, "", &mut visit)
    }

    fn walk_from<E>(
        &self,
        id: NodeId,
        base: &str,
        visit: &mut impl FnMut(GraphEntry<'_>) -> Result<(), E>,
    ) -> Result<(), E> {
        for (name, &child) in &self.nodes[id].children {
            let destination = join_destination(base, name);
            let node = &self.nodes[child];
            visit(GraphEntry {
                destination: &destination,
                source: node.source.as_deref(),
                info: node.info.as_ref(),
                options: node.options.as_deref(),
            })?;
            self.walk_from(child, &destination, visit)?;
        }
        Ok(())
    }

    /// Number of nodes, the implicit root excluded.
    pub fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Files must agree on kind, mode and (for regular files) size.
fn metadata_difference(
    existing: &FileInfo,
    incoming: &FileInfo,
) -> Option<(&'static str, String, String)> {
    if existing.kind != incoming.kind {
        return Some((
            "type",
            existing.kind.as_str().to_string(),
            incoming.kind.as_str().to_string(),
        ));
    }
    if existing.kind != FileKind::Symlink && existing.mode != incoming.mode {
        return Some((
            "mode",
            format!("{:04o}", existing.mode),
            format!("{:04o}", incoming.mode),
        ));
    }
    if existing.kind == FileKind::Regular && existing.size != incoming.size {
        return Some((
            "size",
            existing.size.to_string(),
            incoming.size.to_string(),
        ));
    }
    None
}

fn join_destination(base: &str, name: &str) -> String {
    if name.is_empty() {
        "/".to_string()
    } else if base.is_empty() || base.ends_with('/') {
        format!("{base}{name}")
    } else {
        format!("{base}/{name}")
    }
}

/// Strips the `~nix~case~hack~N` suffix from every component of `path`.
pub fn remove_case_hack_suffix(path: &str) -> String {
    let cleaned = path
        .split('/')
        .map(|part| part.find(CASE_HACK_SUFFIX).map_or(part, |idx| &part[..idx]))
        .collect::<Vec<_>>()
        .join("/");
    let cleaned = clean_path(&cleaned);
    if path.starts_with('/') || cleaned != "." {
        cleaned
    } else {
        String::new()
    }
}

/// Lexically normalizes `path`: repeated separators, `.` and `..` elements
/// and trailing separators are removed.
pub fn clean_path(path: &str) -> String {
    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ if rooted => {}
                _ => parts.push(".."),
            },
            other => parts.push(other),
        }
    }
    let joined = parts.join("/");
    match (rooted, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Splits a destination into graph keys; absolute paths start with the
/// empty root key, and `/` alone is just that key.
pub fn split_path(path: &str) -> Vec<String> {
    let cleaned = clean_path(path);
    if cleaned == "/" {
        return vec![String::new()];
    }
    cleaned.split('/').map(str::to_string).collect()
}
