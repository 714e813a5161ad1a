use std::collections::BTreeMap;
use std::io::{self, Read, Write};

use serde::Serialize;
use tar::{Builder, EntryType, Header};

use super::{EntryKind, TarEntry, MTIME, XATTR_CAPABILITY};
use crate::digest::Digest;

const NAME_FIELD_LEN: usize = 100;
const LONG_LINK: &[u8] = b"././@LongLink";

/// Receives the entries of a serialized file graph, in archive order.
pub trait EntrySink {
    fn append(&mut self, entry: &TarEntry, body: &mut dyn Read) -> io::Result<()>;
}

/// Writes the canonical tar bytes.
pub struct ContentSink<W: Write> {
    builder: Builder<W>,
}

impl<W: Write> ContentSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            builder: Builder::new(writer),
        }
    }

    /// Writes the end-of-archive marker and returns the writer.
    pub fn finish(self) -> io::Result<W> {
        self.builder.into_inner()
    }

    /// Writes a GNU `././@LongLink` record carrying `value` for the next header.
    fn append_long_record(&mut self, kind: EntryType, value: &[u8]) -> io::Result<()> {
        let mut header = Header::new_gnu();
        header.as_old_mut().name[..LONG_LINK.len()].copy_from_slice(LONG_LINK);
        header.set_mode(0o644);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mtime(0);
        header.set_size(value.len() as u64 + 1);
        header.set_entry_type(kind);
        header.set_cksum();
        self.builder.append(&header, value.chain(&[0u8][..]))
    }
}

impl<W: Write> EntrySink for ContentSink<W> {
    fn append(&mut self, entry: &TarEntry, body: &mut dyn Read) -> io::Result<()> {
        if let Some(capability) = &entry.capability {
            let value = capability.to_bytes();
            self.builder
                .append_pax_extensions([(XATTR_CAPABILITY, &value[..])])?;
        }
        // Names are absolute, which `Header::set_path` refuses, so the raw
        // fields are filled here.
        let name = entry.name.as_bytes();
        if name.len() > NAME_FIELD_LEN {
            self.append_long_record(EntryType::GNULongName, name)?;
        }
        let link_name = entry
            .link_name
            .as_ref()
            .map(|target| target.as_os_str().as_encoded_bytes());
        if let Some(target) = link_name.filter(|target| target.len() > NAME_FIELD_LEN) {
            self.append_long_record(EntryType::GNULongLink, target)?;
        }

        let mut header = header_for(entry)?;
        fill_field(&mut header.as_old_mut().name, name);
        if let Some(target) = link_name {
            fill_field(&mut header.as_old_mut().linkname, target);
        }
        header.set_cksum();
        self.builder.append(&header, body)
    }
}

/// Copies `value` into a fixed header field, truncated when a long record
/// already carries it.
fn fill_field(field: &mut [u8; NAME_FIELD_LEN], value: &[u8]) {
    let len = value.len().min(NAME_FIELD_LEN);
    field[..len].copy_from_slice(&value[..len]);
}

fn header_for(entry: &TarEntry) -> io::Result<Header> {
    let mut header = Header::new_gnu();
    header.set_entry_type(match entry.kind {
        EntryKind::Directory => EntryType::Directory,
        EntryKind::Regular => EntryType::Regular,
        EntryKind::Symlink => EntryType::Symlink,
    });
    header.set_mode(entry.mode);
    header.set_uid(entry.uid);
    header.set_gid(entry.gid);
    header.set_username(&entry.uname)?;
    header.set_groupname(&entry.gname)?;
    header.set_size(entry.size);
    header.set_mtime(MTIME);
    if let Some(gnu) = header.as_gnu_mut() {
        gnu.set_atime(0);
        gnu.set_ctime(0);
    }
    Ok(header)
}

#[derive(Serialize)]
struct TraceRecord<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    mode: String,
    uid: u64,
    gid: u64,
    uname: &'a str,
    gname: &'a str,
    size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    linkname: Option<String>,
    mtime: u64,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    xattrs: BTreeMap<&'static str, String>,
    sha256: String,
}

/// Writes one JSON line per entry instead of the archive: the header fields
/// and the digest of the body.
pub struct TraceSink<W: Write> {
    writer: W,
}

impl<W: Write> TraceSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: Write> EntrySink for TraceSink<W> {
    fn append(&mut self, entry: &TarEntry, body: &mut dyn Read) -> io::Result<()> {
        let (digest, _) = Digest::of_reader(body)?;
        let mut xattrs = BTreeMap::new();
        if let Some(capability) = &entry.capability {
            xattrs.insert(XATTR_CAPABILITY, hex::encode(capability.to_bytes()));
        }
        let record = TraceRecord {
            name: &entry.name,
            kind: entry.kind.as_str(),
            mode: format!("{:04o}", entry.mode),
            uid: entry.uid,
            gid: entry.gid,
            uname: &entry.uname,
            gname: &entry.gname,
            size: entry.size,
            linkname: entry
                .link_name
                .as_ref()
                .map(|target| target.to_string_lossy().into_owned()),
            mtime: MTIME,
            xattrs,
            sha256: digest.encoded().to_string(),
        };
        serde_json::to_writer(&mut self.writer, &record)?;
        self.writer.write_all(b"\n")
    }
}
