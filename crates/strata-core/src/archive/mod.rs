//! Deterministic tar serialization of store paths.
//!
//! Paths are first merged into a [`FileGraph`], then the graph is walked in
//! destination order and every node becomes one archive entry. Header
//! fields that depend on the build host (timestamps, owners) are pinned, so
//! the archive bytes only depend on destination names, file contents and
//! the rules attached to each path.

mod sink;
mod stream;

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use strata_domain::Path;
use tempfile::NamedTempFile;

pub use sink::{ContentSink, EntrySink, TraceSink};
pub use stream::TarStream;

use crate::capability::VfsCapData;
use crate::config::TarConfig;
use crate::digest::{Digest, HashingWriter};
use crate::error::BuildError;
use crate::graph::{FileGraph, FileKind, GraphEntry};
use crate::options::{CompiledOptions, Ownership};

/// Modification time of every entry (1970-01-01T00:00:01Z).
pub const MTIME: u64 = 1;
pub const XATTR_CAPABILITY: &str = "SCHILY.xattr.security.capability";

const DIRECTORY_MODE: u32 = 0o755;
const SYMLINK_MODE: u32 = 0o777;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    Regular,
    Symlink,
}

impl EntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Directory => "directory",
            Self::Regular => "regular",
            Self::Symlink => "symlink",
        }
    }
}

/// Header of one archive entry after every override has been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TarEntry {
    /// Absolute destination path; the root directory is `/`.
    pub name: String,
    pub kind: EntryKind,
    pub mode: u32,
    pub uid: u64,
    pub gid: u64,
    pub uname: String,
    pub gname: String,
    pub size: u64,
    pub link_name: Option<PathBuf>,
    pub capability: Option<VfsCapData>,
}

impl TarEntry {
    fn directory(name: String) -> Self {
        let owner = Ownership::root(DIRECTORY_MODE);
        Self {
            name,
            kind: EntryKind::Directory,
            mode: owner.mode,
            uid: owner.uid,
            gid: owner.gid,
            uname: owner.uname,
            gname: owner.gname,
            size: 0,
            link_name: None,
            capability: None,
        }
    }
}

/// Builds the file graph of `paths`, compiling each path's rules once.
pub fn build_graph(paths: &[Path], config: TarConfig) -> Result<FileGraph, BuildError> {
    let mut graph = FileGraph::new(config.case_hack);
    for path in paths {
        let options = path
            .options
            .as_ref()
            .map(|options| CompiledOptions::compile(&path.path, options).map(Arc::new))
            .transpose()?;
        graph.add_path(FsPath::new(&path.path), options.as_ref())?;
    }
    Ok(graph)
}

/// Feeds every node of `graph` to `sink`, in archive order.
pub fn serialize_graph(graph: &FileGraph, sink: &mut dyn EntrySink) -> Result<(), BuildError> {
    graph.walk(|node| {
        let (entry, source) = entry_for(&node)?;
        match (entry.kind, source) {
            (EntryKind::Regular, Some(source)) => {
                let file = File::open(source).map_err(|err| BuildError::io(source, err))?;
                let actual = file
                    .metadata()
                    .map_err(|err| BuildError::io(source, err))?
                    .len();
                if actual != entry.size {
                    return Err(BuildError::Unsupported {
                        path: source.into(),
                        reason: format!(
                            "size changed from {} to {actual} bytes during the build",
                            entry.size
                        ),
                    });
                }
                sink.append(&entry, &mut file.take(entry.size))
                    .map_err(BuildError::Archive)
            }
            _ => sink
                .append(&entry, &mut io::empty())
                .map_err(BuildError::Archive),
        }
    })
}

/// Derives the archive entry of a graph node, named by its destination.
fn entry_for<'a>(node: &GraphEntry<'a>) -> Result<(TarEntry, Option<&'a str>), BuildError> {
    let name = node.destination;
    let (Some(info), Some(source)) = (node.info, node.source) else {
        return Ok((TarEntry::directory(name.to_string()), None));
    };

    let (kind, link_name) = match info.kind {
        FileKind::Directory => (EntryKind::Directory, None),
        FileKind::Regular => (EntryKind::Regular, None),
        FileKind::Symlink => {
            let target = fs::read_link(source).map_err(|err| BuildError::io(source, err))?;
            (EntryKind::Symlink, Some(target))
        }
        FileKind::Other => {
            return Err(BuildError::Unsupported {
                path: source.into(),
                reason: "only regular files, directories and symlinks can be archived"
                    .to_string(),
            })
        }
    };

    // Symlink permission bits vary between hosts.
    let mode = if kind == EntryKind::Symlink {
        SYMLINK_MODE
    } else {
        info.mode
    };
    let mut owner = Ownership::root(mode);
    let mut capability = None;
    if let Some(options) = node.options {
        options.apply_perms(source, &mut owner);
        capability = options.capability_for(source);
    }

    let entry = TarEntry {
        name: name.to_string(),
        kind,
        mode: owner.mode,
        uid: owner.uid,
        gid: owner.gid,
        uname: owner.uname,
        gname: owner.gname,
        size: if kind == EntryKind::Regular { info.size } else { 0 },
        link_name,
        capability,
    };
    Ok((entry, Some(source)))
}

/// Streams the archive of `paths` from a background producer.
pub fn tar_paths(paths: &[Path], config: TarConfig) -> TarStream {
    let paths = paths.to_vec();
    TarStream::spawn(move |out| {
        let graph = build_graph(&paths, config)?;
        let mut sink = ContentSink::new(out);
        serialize_graph(&graph, &mut sink)?;
        sink.finish().map_err(BuildError::Archive)?;
        Ok(())
    })
}

/// Digest and size of the archive of `paths`, without keeping it.
pub fn tar_paths_sum(paths: &[Path], config: TarConfig) -> Result<(Digest, u64), BuildError> {
    Digest::of_reader(tar_paths(paths, config)).map_err(BuildError::from_stream)
}

/// Writes the archive of `paths` to `<directory>/<hex digest>.tar`.
///
/// The bytes go to a temporary file in `directory` that is only renamed once
/// complete; a failure leaves nothing behind.
pub fn tar_paths_write(
    paths: &[Path],
    config: TarConfig,
    directory: &FsPath,
) -> Result<(PathBuf, Digest, u64), BuildError> {
    fs::create_dir_all(directory).map_err(|err| BuildError::io(directory, err))?;
    let temp = NamedTempFile::new_in(directory).map_err(|err| BuildError::io(directory, err))?;
    let mut writer = HashingWriter::new(BufWriter::new(temp));
    io::copy(&mut tar_paths(paths, config), &mut writer).map_err(BuildError::from_stream)?;
    let (buffered, digest, size) = writer.finish();
    let temp = buffered
        .into_inner()
        .map_err(|err| BuildError::io(directory, err.into_error()))?;

    let layer_path = directory.join(format!("{}.tar", digest.encoded()));
    match temp.persist_noclobber(&layer_path) {
        Ok(_) => {}
        Err(err) => {
            if err.error.kind() != io::ErrorKind::AlreadyExists {
                return Err(BuildError::io(&layer_path, err.error));
            }
        }
    }
    Ok((layer_path, digest, size))
}

/// Writes the trace of the archive of `paths`: one JSON line per entry.
pub fn tar_paths_trace(
    paths: &[Path],
    config: TarConfig,
    writer: &mut dyn Write,
) -> Result<(), BuildError> {
    let graph = build_graph(paths, config)?;
    let mut sink = TraceSink::new(writer);
    serialize_graph(&graph, &mut sink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use strata_domain::{Capability, PathOptions, Perm};
    use tempfile::{tempdir, TempDir};

    fn config() -> TarConfig {
        TarConfig { case_hack: false }
    }

    struct Fixture {
        _temp: TempDir,
        hash1: String,
        hash2: String,
    }

    fn fixture() -> Fixture {
        let temp = tempdir().expect("tempdir");
        let hash1 = temp.path().join("hash1");
        let hash2 = temp.path().join("hash2");
        fs::create_dir_all(hash1.join("bin")).expect("mkdir");
        fs::create_dir_all(hash2.join("lib")).expect("mkdir");
        fs::write(hash1.join("bin/hello"), b"#!/bin/sh\necho hello\n").expect("write");
        fs::write(hash2.join("lib/libfoo.so"), vec![7u8; 1500]).expect("write");
        #[cfg(unix)]
        std::os::unix::fs::symlink("../lib/libfoo.so", hash1.join("bin/link"))
            .expect("symlink");
        Fixture {
            hash1: hash1.to_str().expect("utf-8").to_string(),
            hash2: hash2.to_str().expect("utf-8").to_string(),
            _temp: temp,
        }
    }

    fn read_entries(bytes: &[u8]) -> BTreeMap<String, (tar::EntryType, u32, Option<Vec<u8>>)> {
        let mut archive = tar::Archive::new(bytes);
        let mut entries = BTreeMap::new();
        for entry in archive.entries().expect("entries") {
            let mut entry = entry.expect("entry");
            let name = entry.path().expect("path").to_string_lossy().into_owned();
            let header = entry.header();
            let kind = header.entry_type();
            let mode = header.mode().expect("mode");
            assert_eq!(header.mtime().expect("mtime"), MTIME);
            let cap = entry
                .pax_extensions()
                .expect("pax")
                .and_then(|mut exts| {
                    exts.find_map(|ext| {
                        let ext = ext.ok()?;
                        (ext.key().ok()? == XATTR_CAPABILITY).then(|| ext.value_bytes().to_vec())
                    })
                });
            entries.insert(name, (kind, mode, cap));
        }
        entries
    }

    fn archive(paths: &[Path]) -> Vec<u8> {
        let mut bytes = Vec::new();
        tar_paths(paths, config())
            .read_to_end(&mut bytes)
            .expect("archive");
        bytes
    }

    #[test]
    fn digest_ignores_path_order() -> Result<(), BuildError> {
        let fx = fixture();
        let forward = [Path::new(fx.hash1.clone()), Path::new(fx.hash2.clone())];
        let backward = [Path::new(fx.hash2.clone()), Path::new(fx.hash1.clone())];
        let (first, size) = tar_paths_sum(&forward, config())?;
        let (second, _) = tar_paths_sum(&backward, config())?;
        assert_eq!(first, second);
        assert_eq!(size % 512, 0);
        assert_eq!(tar_paths_sum(&forward, config())?.0, first);
        Ok(())
    }

    #[test]
    fn memory_and_disk_digests_agree() -> Result<(), BuildError> {
        let fx = fixture();
        let out = tempdir().map_err(|err| BuildError::io("tempdir", err))?;
        let paths = [Path::new(fx.hash1.clone()), Path::new(fx.hash2.clone())];
        let (summed, summed_size) = tar_paths_sum(&paths, config())?;
        let (file, written, written_size) = tar_paths_write(&paths, config(), out.path())?;
        assert_eq!(summed, written);
        assert_eq!(summed_size, written_size);
        assert_eq!(file, out.path().join(format!("{}.tar", written.encoded())));
        let on_disk = fs::read(&file).map_err(|err| BuildError::io(&file, err))?;
        assert_eq!(Digest::of_bytes(&on_disk), written);

        let (again, _, _) = tar_paths_write(&paths, config(), out.path())?;
        assert_eq!(again, file);
        let leftovers = fs::read_dir(out.path())
            .map_err(|err| BuildError::io(out.path(), err))?
            .count();
        assert_eq!(leftovers, 1);
        Ok(())
    }

    #[test]
    fn headers_are_named_by_destination() {
        let fx = fixture();
        let bytes = archive(&[Path::new(fx.hash1.clone())]);
        let entries = read_entries(&bytes);
        assert!(entries.keys().all(|name| name.starts_with('/')));

        let mut archive = tar::Archive::new(&bytes[..]);
        let first = archive
            .entries()
            .expect("entries")
            .next()
            .expect("root entry")
            .expect("entry");
        assert_eq!(&*first.path_bytes(), b"/");
        assert!(first.header().entry_type().is_dir());
        assert_eq!(first.header().mode().expect("mode"), 0o755);
        assert_eq!(first.header().username().expect("uname"), Some("root"));

        let first_component = format!("/{}", fx.hash1.split('/').nth(1).expect("component"));
        let (kind, mode, _) = &entries[&first_component];
        assert!(kind.is_dir());
        assert_eq!(*mode, 0o755);

        #[cfg(unix)]
        {
            let (kind, mode, _) = &entries[&format!("{}/bin/link", fx.hash1)];
            assert!(kind.is_symlink());
            assert_eq!(*mode, 0o777);
        }
    }

    #[test]
    fn long_names_use_gnu_records() {
        let temp = tempdir().expect("tempdir");
        let nested = temp.path().join("store").join("d".repeat(60)).join("e".repeat(60));
        fs::create_dir_all(&nested).expect("mkdir");
        fs::write(nested.join("file"), b"long").expect("write");
        #[cfg(unix)]
        std::os::unix::fs::symlink(nested.join("file"), nested.join("link")).expect("symlink");
        let root = temp.path().join("store");
        let root = root.to_str().expect("utf-8");
        let file = format!("{}/file", nested.to_str().expect("utf-8"));
        assert!(file.len() > 100);

        let bytes = archive(&[Path::new(root)]);
        let mut archive = tar::Archive::new(&bytes[..]);
        let mut found = BTreeMap::new();
        for entry in archive.entries().expect("entries") {
            let entry = entry.expect("entry");
            let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
            let link = entry
                .link_name_bytes()
                .map(|target| String::from_utf8_lossy(&target).into_owned());
            found.insert(name, (entry.header().size().expect("size"), link));
        }
        assert_eq!(found[&file], (4, None));
        #[cfg(unix)]
        assert_eq!(
            found[&format!("{}/link", nested.to_str().expect("utf-8"))],
            (0, Some(file.clone()))
        );
    }

    #[test]
    fn perm_and_capability_rules_reach_headers() {
        let fx = fixture();
        let options = PathOptions {
            perms: vec![Perm {
                regex: "bin/hello$".into(),
                mode: "0750".into(),
                uid: 1000,
                gid: 100,
                uname: "app".into(),
                gname: String::new(),
            }],
            capabilities: vec![Capability {
                regex: "bin/hello$".into(),
                capabilities: vec!["CAP_NET_BIND_SERVICE".into()],
                effective: true,
            }],
            ..PathOptions::default()
        };
        let paths = [Path {
            path: fx.hash1.clone(),
            options: Some(options),
        }];
        let bytes = archive(&paths);
        let hello = format!("{}/bin/hello", fx.hash1);

        let mut archive = tar::Archive::new(&bytes[..]);
        let entry = archive
            .entries()
            .expect("entries")
            .map(|entry| entry.expect("entry"))
            .find(|entry| entry.path().expect("path").to_string_lossy() == hello)
            .expect("hello entry");
        let header = entry.header();
        assert_eq!(header.mode().expect("mode"), 0o750);
        assert_eq!(header.uid().expect("uid"), 1000);
        assert_eq!(header.gid().expect("gid"), 100);
        assert_eq!(header.username().expect("uname"), Some("app"));
        assert_eq!(header.groupname().expect("gname"), Some("root"));

        let entries = read_entries(&bytes);
        let (_, _, cap) = &entries[&hello];
        let data = VfsCapData::from_bytes(cap.as_deref().expect("capability xattr"))
            .expect("valid vfs_cap_data");
        assert_eq!(data.permitted, 1 << 10);
        assert_eq!(data.inheritable, 1 << 10);
        assert!(data.effective());
        let (_, _, none) = &entries[&format!("{}/bin", fx.hash1)];
        assert!(none.is_none());
    }

    #[test]
    fn trace_has_one_line_per_entry() -> Result<(), BuildError> {
        let fx = fixture();
        let paths = [Path::new(fx.hash2.clone())];
        let mut trace = Vec::new();
        tar_paths_trace(&paths, config(), &mut trace)?;
        let text = String::from_utf8(trace).expect("utf-8");
        let entry_count = read_entries(&archive(&paths)).len();
        assert_eq!(text.split('\n').count(), entry_count + 1);

        let lib = text
            .lines()
            .map(|line| serde_json::from_str::<serde_json::Value>(line).expect("json"))
            .find(|record| {
                record["name"]
                    .as_str()
                    .is_some_and(|name| name.ends_with("lib/libfoo.so"))
            })
            .expect("library record");
        assert_eq!(lib["type"], "regular");
        assert_eq!(lib["size"], 1500);
        assert_eq!(lib["sha256"], Digest::of_bytes(&[7u8; 1500]).encoded());
        Ok(())
    }

    #[test]
    fn missing_paths_abort_the_stream() {
        let paths = [Path::new("/definitely/not/here")];
        let err = tar_paths_sum(&paths, config()).unwrap_err();
        assert!(matches!(err, BuildError::Walk { .. }));
    }
}
