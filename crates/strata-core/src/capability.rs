//! Linux file capabilities in the `security.capability` xattr layout.

const VFS_CAP_REVISION_2: u32 = 0x0200_0000;
const VFS_CAP_REVISION_3: u32 = 0x0300_0000;
const VFS_CAP_REVISION_MASK: u32 = 0xff00_0000;
const VFS_CAP_FLAGS_EFFECTIVE: u32 = 0x0000_0001;

pub const XATTR_CAPS_SZ_2: usize = 20;
pub const XATTR_CAPS_SZ_3: usize = 24;

/// Capability names indexed by their bit number.
const CAPABILITY_NAMES: [&str; 41] = [
    "CHOWN",
    "DAC_OVERRIDE",
    "DAC_READ_SEARCH",
    "FOWNER",
    "FSETID",
    "KILL",
    "SETGID",
    "SETUID",
    "SETPCAP",
    "LINUX_IMMUTABLE",
    "NET_BIND_SERVICE",
    "NET_BROADCAST",
    "NET_ADMIN",
    "NET_RAW",
    "IPC_LOCK",
    "IPC_OWNER",
    "SYS_MODULE",
    "SYS_RAWIO",
    "SYS_CHROOT",
    "SYS_PTRACE",
    "SYS_PACCT",
    "SYS_ADMIN",
    "SYS_BOOT",
    "SYS_NICE",
    "SYS_RESOURCE",
    "SYS_TIME",
    "SYS_TTY_CONFIG",
    "MKNOD",
    "LEASE",
    "AUDIT_WRITE",
    "AUDIT_CONTROL",
    "SETFCAP",
    "MAC_OVERRIDE",
    "MAC_ADMIN",
    "SYSLOG",
    "WAKE_ALARM",
    "BLOCK_SUSPEND",
    "AUDIT_READ",
    "PERFMON",
    "BPF",
    "CHECKPOINT_RESTORE",
];

/// Resolves `CAP_NET_RAW`, `net_raw` or a bare bit number.
pub fn capability_bit(name: &str) -> Option<u32> {
    let trimmed = name.trim();
    if let Ok(bit) = trimmed.parse::<u32>() {
        return (bit < 64).then_some(bit);
    }
    let upper = trimmed.to_ascii_uppercase();
    let bare = upper.strip_prefix("CAP_").unwrap_or(&upper);
    CAPABILITY_NAMES
        .iter()
        .position(|candidate| *candidate == bare)
        .and_then(|index| u32::try_from(index).ok())
}

/// Folds capability names into a 64-bit mask; returns the first unknown name
/// on failure.
pub fn capability_mask<S: AsRef<str>>(names: &[S]) -> Result<u64, String> {
    names.iter().try_fold(0u64, |mask, name| {
        capability_bit(name.as_ref())
            .map(|bit| mask | (1u64 << bit))
            .ok_or_else(|| name.as_ref().to_string())
    })
}

/// `struct vfs_ns_cap_data` (revision 3) as stored on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VfsCapData {
    pub magic_etc: u32,
    pub permitted: u64,
    pub inheritable: u64,
    pub root_id: u32,
}

impl VfsCapData {
    pub fn new(permitted: u64, inheritable: u64, effective: bool) -> Self {
        let mut magic_etc = VFS_CAP_REVISION_3;
        if effective {
            magic_etc |= VFS_CAP_FLAGS_EFFECTIVE;
        }
        Self {
            magic_etc,
            permitted,
            inheritable,
            root_id: 0,
        }
    }

    pub fn effective(&self) -> bool {
        self.magic_etc & VFS_CAP_FLAGS_EFFECTIVE != 0
    }

    pub fn to_bytes(&self) -> [u8; XATTR_CAPS_SZ_3] {
        let words = [
            self.magic_etc,
            low_word(self.permitted),
            low_word(self.inheritable),
            high_word(self.permitted),
            high_word(self.inheritable),
            self.root_id,
        ];
        let mut out = [0u8; XATTR_CAPS_SZ_3];
        for (chunk, word) in out.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    /// Parses a revision 2 (20 bytes) or revision 3 (24 bytes) value.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let word = |index: usize| -> Option<u32> {
            let raw = bytes.get(index * 4..index * 4 + 4)?;
            Some(u32::from_le_bytes(raw.try_into().ok()?))
        };
        let magic_etc = word(0)?;
        let root_id = match (magic_etc & VFS_CAP_REVISION_MASK, bytes.len()) {
            (VFS_CAP_REVISION_2, XATTR_CAPS_SZ_2) => 0,
            (VFS_CAP_REVISION_3, XATTR_CAPS_SZ_3) => word(5)?,
            _ => return None,
        };
        Some(Self {
            magic_etc,
            permitted: join_words(word(1)?, word(3)?),
            inheritable: join_words(word(2)?, word(4)?),
            root_id,
        })
    }
}

fn low_word(value: u64) -> u32 {
    (value & 0xffff_ffff) as u32
}

fn high_word(value: u64) -> u32 {
    (value >> 32) as u32
}

fn join_words(low: u32, high: u32) -> u64 {
    u64::from(low) | (u64::from(high) << 32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_names_in_any_spelling() {
        assert_eq!(capability_bit("CAP_NET_BIND_SERVICE"), Some(10));
        assert_eq!(capability_bit("net_raw"), Some(13));
        assert_eq!(capability_bit("cap_checkpoint_restore"), Some(40));
        assert_eq!(capability_bit("12"), Some(12));
        assert_eq!(capability_bit("CAP_FLY"), None);
        assert_eq!(capability_mask(&["CAP_CHOWN", "CAP_BPF"]), Ok(1 | (1 << 39)));
        assert_eq!(capability_mask(&["CAP_CHOWN", "nope"]), Err("nope".to_string()));
    }

    #[test]
    fn encodes_revision_three_layout() {
        let data = VfsCapData::new(1 << 10, 1 << 10, true);
        let bytes = data.to_bytes();
        assert_eq!(&bytes[0..4], &[0x01, 0x00, 0x00, 0x03]);
        assert_eq!(&bytes[4..8], &[0x00, 0x04, 0x00, 0x00]);
        assert_eq!(&bytes[8..12], &[0x00, 0x04, 0x00, 0x00]);
        assert_eq!(&bytes[12..24], &[0u8; 12]);
    }

    #[test]
    fn high_capabilities_land_in_second_word_pair() {
        let data = VfsCapData::new(1 << 38, 0, false);
        let bytes = data.to_bytes();
        assert_eq!(&bytes[0..4], &[0x00, 0x00, 0x00, 0x03]);
        assert_eq!(&bytes[12..16], &[0x40, 0x00, 0x00, 0x00]);
        assert_eq!(VfsCapData::from_bytes(&bytes), Some(data));
        assert!(!data.effective());
    }

    #[test]
    fn parses_revision_two_and_rejects_garbage() {
        let mut v2 = [0u8; XATTR_CAPS_SZ_2];
        v2[0..4].copy_from_slice(&(VFS_CAP_REVISION_2 | VFS_CAP_FLAGS_EFFECTIVE).to_le_bytes());
        v2[4..8].copy_from_slice(&(1u32 << 13).to_le_bytes());
        let parsed = VfsCapData::from_bytes(&v2).expect("revision 2");
        assert_eq!(parsed.permitted, 1 << 13);
        assert!(parsed.effective());
        assert!(VfsCapData::from_bytes(&[0u8; 12]).is_none());
        assert!(VfsCapData::from_bytes(&v2[..XATTR_CAPS_SZ_2 - 1]).is_none());
    }
}
