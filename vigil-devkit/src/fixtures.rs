/*!
Fixtures de systèmes de fichiers

Fournit un `FsStatsProvider` à contenu fixe pour tester le check `storage`
sans dépendre des disques de la machine.
*/

use vigil_agent::check::drive_size::filter::{Filter, FsType};
use vigil_agent::check::drive_size::{FsStat, FsStatsProvider};

#[derive(Debug, Clone)]
pub struct FsEntry {
    pub fs: String,
    pub mount_point: String,
    pub fs_type: FsType,
    pub used: u64,
    pub total: u64,
}

/// Liste de filesystems figée, filtrée comme le ferait l'OS
#[derive(Debug, Clone, Default)]
pub struct StaticFsStats {
    entries: Vec<FsEntry>,
}

impl StaticFsStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, fs: &str, mount_point: &str, fs_type: FsType, used: u64, total: u64) -> Self {
        self.entries.push(FsEntry {
            fs: fs.to_string(),
            mount_point: mount_point.to_string(),
            fs_type,
            used,
            total,
        });
        self
    }

    /// Poste Linux typique: 9 montages dont 6 tmpfs/udev
    pub fn standard_linux() -> Self {
        let fixed = FsType::STORAGE_FIXED_DISK;
        Self::new()
            .with("udev", "/dev", fixed | FsType::FS_OTHER, 0, 6_024_132_000)
            .with("tmpfs", "/run", fixed | FsType::FS_OTHER, 16_760_000, 1_212_868_000)
            .with("/dev/sda12", "/", fixed | FsType::FS_LINUX_EXT4, 136_830_444_000, 346_066_920_000)
            .with("tmpfs", "/dev/shm", fixed | FsType::FS_OTHER, 0, 6_072_708_000)
            .with("tmpfs", "/run/lock", fixed | FsType::FS_OTHER, 4_000, 5_116_000)
            .with("tmpfs", "/sys/fs/cgroup", fixed | FsType::FS_OTHER, 0, 6_072_708_000)
            .with("/dev/sda11", "/boot/efi", fixed | FsType::FS_FAT, 24_000, 524_248_000)
            .with("/dev/sda5", "/data", fixed | FsType::FS_FAT32, 3_072_708_000, 6_072_708_000)
            .with("tmpfs", "/run/user/1001", fixed | FsType::FS_OTHER, 100_000, 1_214_440_000)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FsStatsProvider for StaticFsStats {
    fn fs_stats(&self, filter: &mut Filter) -> Vec<FsStat> {
        self.entries
            .iter()
            .filter(|e| filter.is_allowed(&e.fs, &e.mount_point, e.fs_type))
            .map(|e| FsStat::new(&e.fs, &e.mount_point, e.used, e.total))
            .collect()
    }
}
