//! Filesystem selection for the storage check
//!
//! Storage/fs types are matched against the `hr*` labels; filesystem names
//! and mount points against full-match regexes. Verdicts on names and mount
//! points are cached since the same filesystems come back on every run.

use crate::check::args::NativeArgs;
use crate::error::CheckError;
use regex::Regex;
use std::collections::HashSet;
use std::ops::BitOr;

/// Bit set of storage kinds and filesystem types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FsType(u64);

impl FsType {
    pub const UNKNOWN: FsType = FsType(1 << 0);
    pub const STORAGE_RAM: FsType = FsType(1 << 1);
    pub const STORAGE_VIRTUAL_MEMORY: FsType = FsType(1 << 2);
    pub const STORAGE_FIXED_DISK: FsType = FsType(1 << 3);
    pub const STORAGE_REMOVABLE_DISK: FsType = FsType(1 << 4);
    pub const STORAGE_FLOPPY_DISK: FsType = FsType(1 << 5);
    pub const STORAGE_COMPACT_DISC: FsType = FsType(1 << 6);
    pub const STORAGE_RAM_DISK: FsType = FsType(1 << 7);
    pub const STORAGE_FLASH_MEMORY: FsType = FsType(1 << 8);
    pub const STORAGE_NETWORK_DISK: FsType = FsType(1 << 9);
    pub const FS_OTHER: FsType = FsType(1 << 10);
    pub const FS_UNKNOWN: FsType = FsType(1 << 11);
    pub const FS_BERKELEY_FFS: FsType = FsType(1 << 12);
    pub const FS_SYS5_FS: FsType = FsType(1 << 13);
    pub const FS_FAT: FsType = FsType(1 << 14);
    pub const FS_HPFS: FsType = FsType(1 << 15);
    pub const FS_HFS: FsType = FsType(1 << 16);
    pub const FS_MFS: FsType = FsType(1 << 17);
    pub const FS_NTFS: FsType = FsType(1 << 18);
    pub const FS_VNODE: FsType = FsType(1 << 19);
    pub const FS_JOURNALED: FsType = FsType(1 << 20);
    pub const FS_ISO9660: FsType = FsType(1 << 21);
    pub const FS_ROCK_RIDGE: FsType = FsType(1 << 22);
    pub const FS_NFS: FsType = FsType(1 << 23);
    pub const FS_NETWARE: FsType = FsType(1 << 24);
    pub const FS_AFS: FsType = FsType(1 << 25);
    pub const FS_DFS: FsType = FsType(1 << 26);
    pub const FS_APPLESHARE: FsType = FsType(1 << 27);
    pub const FS_RFS: FsType = FsType(1 << 28);
    pub const FS_DGCFS: FsType = FsType(1 << 29);
    pub const FS_BFS: FsType = FsType(1 << 30);
    pub const FS_FAT32: FsType = FsType(1 << 31);
    pub const FS_LINUX_EXT2: FsType = FsType(1 << 32);
    pub const FS_LINUX_EXT4: FsType = FsType(1 << 33);
    pub const FS_EXFAT: FsType = FsType(1 << 34);

    pub const ALL: FsType = FsType((1 << 35) - 1);

    pub fn intersects(self, other: FsType) -> bool {
        self.0 & other.0 != 0
    }

    /// Type flags of a filesystem as named by the OS (`ext4`, `vfat`...).
    pub fn from_fs_name(name: &str) -> FsType {
        match name.to_ascii_lowercase().as_str() {
            "ext2" => Self::FS_LINUX_EXT2,
            "ext3" | "ext4" => Self::FS_LINUX_EXT4,
            "fat" | "vfat" | "msdos" => Self::FS_FAT,
            "fat32" => Self::FS_FAT32,
            "exfat" => Self::FS_EXFAT,
            "ntfs" | "ntfs3" | "fuseblk" => Self::FS_NTFS,
            "iso9660" => Self::FS_ISO9660,
            "hfs" | "hfsplus" | "apfs" => Self::FS_HFS,
            "nfs" | "nfs4" => Self::FS_NFS | Self::STORAGE_NETWORK_DISK,
            "cifs" | "smbfs" | "smb3" => Self::FS_DFS | Self::STORAGE_NETWORK_DISK,
            "afs" => Self::FS_AFS | Self::STORAGE_NETWORK_DISK,
            "tmpfs" | "ramfs" => Self::FS_OTHER | Self::STORAGE_RAM_DISK,
            "" => Self::FS_UNKNOWN,
            _ => Self::FS_OTHER,
        }
    }
}

impl BitOr for FsType {
    type Output = FsType;

    fn bitor(self, rhs: FsType) -> FsType {
        FsType(self.0 | rhs.0)
    }
}

pub const FS_TYPE_LABELS: [(&str, FsType); 35] = [
    ("hrunknown", FsType::UNKNOWN),
    ("hrstorageram", FsType::STORAGE_RAM),
    ("hrstoragevirtualmemory", FsType::STORAGE_VIRTUAL_MEMORY),
    ("hrstoragefixeddisk", FsType::STORAGE_FIXED_DISK),
    ("hrstorageremovabledisk", FsType::STORAGE_REMOVABLE_DISK),
    ("hrstoragefloppydisk", FsType::STORAGE_FLOPPY_DISK),
    ("hrstoragecompactdisc", FsType::STORAGE_COMPACT_DISC),
    ("hrstorageramdisk", FsType::STORAGE_RAM_DISK),
    ("hrstorageflashmemory", FsType::STORAGE_FLASH_MEMORY),
    ("hrstoragenetworkdisk", FsType::STORAGE_NETWORK_DISK),
    ("hrfsother", FsType::FS_OTHER),
    ("hrfsunknown", FsType::FS_UNKNOWN),
    ("hrfsberkeleyffs", FsType::FS_BERKELEY_FFS),
    ("hrfssys5fs", FsType::FS_SYS5_FS),
    ("hrfsfat", FsType::FS_FAT),
    ("hrfshpfs", FsType::FS_HPFS),
    ("hrfshfs", FsType::FS_HFS),
    ("hrfsmfs", FsType::FS_MFS),
    ("hrfsntfs", FsType::FS_NTFS),
    ("hrfsvnode", FsType::FS_VNODE),
    ("hrfsjournaled", FsType::FS_JOURNALED),
    ("hrfsiso9660", FsType::FS_ISO9660),
    ("hrfsrockridge", FsType::FS_ROCK_RIDGE),
    ("hrfsnfs", FsType::FS_NFS),
    ("hrfsnetware", FsType::FS_NETWARE),
    ("hrfsafs", FsType::FS_AFS),
    ("hrfsdfs", FsType::FS_DFS),
    ("hrfsappleshare", FsType::FS_APPLESHARE),
    ("hrfsrfs", FsType::FS_RFS),
    ("hrfsdgcfs", FsType::FS_DGCFS),
    ("hrfsbfs", FsType::FS_BFS),
    ("hrfsfat32", FsType::FS_FAT32),
    ("hrfslinuxext2", FsType::FS_LINUX_EXT2),
    ("hrfslinuxext4", FsType::FS_LINUX_EXT4),
    ("hrfsexfat", FsType::FS_EXFAT),
];

/// Regex that must match the whole input.
fn full_match_regex(name: &str, pattern: &str) -> Result<Regex, CheckError> {
    Regex::new(&format!("^(?:{})$", pattern)).map_err(|source| CheckError::InvalidRegex {
        name: name.to_string(),
        source,
    })
}

fn optional_regex(args: NativeArgs<'_>, name: &str) -> Result<Option<Regex>, CheckError> {
    args.string(name)?
        .map(|pattern| full_match_regex(name, pattern))
        .transpose()
}

/// Include/exclude decision with a verdict cache.
#[derive(Debug, Default)]
struct CachedMatcher {
    include: Option<Regex>,
    exclude: Option<Regex>,
    allowed: HashSet<String>,
    excluded: HashSet<String>,
}

impl CachedMatcher {
    fn is_allowed(&mut self, value: &str) -> bool {
        if self.excluded.contains(value) {
            return false;
        }
        if self.allowed.contains(value) {
            return true;
        }
        let allowed = !self.exclude.as_ref().is_some_and(|re| re.is_match(value))
            && self.include.as_ref().map_or(true, |re| re.is_match(value));
        if allowed {
            self.allowed.insert(value.to_string());
        } else {
            self.excluded.insert(value.to_string());
        }
        allowed
    }
}

#[derive(Debug)]
pub struct Filter {
    fs_types: FsType,
    fs: CachedMatcher,
    mount_point: CachedMatcher,
}

impl Default for Filter {
    fn default() -> Self {
        Self {
            fs_types: FsType::ALL,
            fs: CachedMatcher::default(),
            mount_point: CachedMatcher::default(),
        }
    }
}

impl Filter {
    pub fn from_args(args: NativeArgs<'_>) -> Result<Self, CheckError> {
        let mut filter = Filter::default();

        let type_filter = match args.string("filter-storage-type")? {
            Some(pattern) => Some(("filter-storage-type", pattern)),
            None => args.string("filter-type")?.map(|p| ("filter-type", p)),
        };
        if let Some((name, pattern)) = type_filter {
            let re = full_match_regex(name, &pattern.to_lowercase())?;
            filter.fs_types = FS_TYPE_LABELS
                .iter()
                .filter(|(label, _)| re.is_match(label))
                .fold(FsType::default(), |acc, (_, flag)| acc | *flag);
        }

        filter.fs.include = optional_regex(args, "filter-fs")?;
        filter.fs.exclude = optional_regex(args, "exclude-fs")?;
        filter.mount_point.include = optional_regex(args, "filter-mountpoint")?;
        filter.mount_point.exclude = optional_regex(args, "exclude-mountpoint")?;
        Ok(filter)
    }

    pub fn is_allowed(&mut self, fs: &str, mount_point: &str, fs_type: FsType) -> bool {
        self.fs_types.intersects(fs_type)
            && self.fs.is_allowed(fs)
            && self.mount_point.is_allowed(mount_point)
    }

    pub fn cached_verdicts(&self) -> usize {
        self.fs.allowed.len()
            + self.fs.excluded.len()
            + self.mount_point.allowed.len()
            + self.mount_point.excluded.len()
    }
}
