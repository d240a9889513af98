//! Ready-made rotation callbacks and identifier builders.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::handle::WriteHandle;

/// Path of the `n`th backup of `path`, e.g. `app.log.0`.
#[must_use]
pub fn backup_path(path: &Path, n: usize) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{n}"));
    PathBuf::from(name)
}

/// Moves `path` to `path.0`, shifting existing backups up by one and
/// discarding the oldest so that at most `max_files` backups remain.
///
/// `path.0` is always the newest backup. A `max_files` of zero is treated
/// as one.
///
/// # Errors
///
/// Returns an error if checking, removing or renaming any file fails.
pub fn rotate_backups(path: &Path, max_files: usize) -> io::Result<()> {
    let max_files = max_files.max(1);

    // Find the first slot that is free, or can be freed by evicting the
    // oldest retained backup.
    let mut free = 0;
    loop {
        let candidate = backup_path(path, free);
        if !candidate.try_exists()? {
            break;
        }
        if free + 1 >= max_files {
            fs::remove_file(&candidate)?;
            debug!(path = %candidate.display(), "evicted oldest backup");
            break;
        }
        free += 1;
    }

    for n in (0..free).rev() {
        fs::rename(backup_path(path, n), backup_path(path, n + 1))?;
    }

    fs::rename(path, backup_path(path, 0))
}

/// Rotation callback keeping a chain of numbered backups, see
/// [`rotate_backups`].
pub fn serial_rotation<C>(
    max_files: usize,
) -> impl Fn(&str, &Path, &C) -> io::Result<()> + Send + Sync + 'static {
    move |_id: &str, path: &Path, _ctx: &C| rotate_backups(path, max_files)
}

/// Identifier builder that starts a new generation once the current handle
/// has grown beyond `max_bytes`.
///
/// Handles that cannot report their size never trigger rotation.
pub fn size_rotation<C>(
    max_bytes: u64,
) -> impl Fn(Option<&dyn WriteHandle>, &C) -> io::Result<String> + Send + Sync + 'static {
    let generation = AtomicU64::new(0);
    move |handle: Option<&dyn WriteHandle>, _ctx: &C| {
        if let Some(handle) = handle
            && let Ok(size) = handle.size()
            && size > max_bytes
        {
            generation.fetch_add(1, Ordering::Relaxed);
        }
        Ok(generation.load(Ordering::Relaxed).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::tempdir;

    use crate::handle::MemoryHandle;

    fn backups(path: &Path) -> Vec<usize> {
        (0..16).filter(|n| backup_path(path, *n).exists()).collect()
    }

    #[test]
    fn test_backup_path() {
        assert_eq!(
            backup_path(Path::new("/var/log/app.log"), 3),
            PathBuf::from("/var/log/app.log.3")
        );
    }

    #[test]
    fn test_chain_is_bounded_and_newest_first() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");

        for generation in 0..10 {
            fs::write(&path, generation.to_string()).unwrap();
            rotate_backups(&path, 3).unwrap();

            assert!(!path.exists());
            assert!(backups(&path).len() <= 3);
            assert_eq!(
                fs::read_to_string(backup_path(&path, 0)).unwrap(),
                generation.to_string()
            );
        }

        assert_eq!(backups(&path), vec![0, 1, 2]);
        assert_eq!(fs::read_to_string(backup_path(&path, 1)).unwrap(), "8");
        assert_eq!(fs::read_to_string(backup_path(&path, 2)).unwrap(), "7");
    }

    #[test]
    fn test_gap_in_chain_is_filled() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        fs::write(backup_path(&path, 0), "old-0").unwrap();
        fs::write(backup_path(&path, 2), "old-2").unwrap();
        fs::write(&path, "live").unwrap();

        rotate_backups(&path, 5).unwrap();

        assert_eq!(fs::read_to_string(backup_path(&path, 0)).unwrap(), "live");
        assert_eq!(fs::read_to_string(backup_path(&path, 1)).unwrap(), "old-0");
        assert_eq!(fs::read_to_string(backup_path(&path, 2)).unwrap(), "old-2");
    }

    #[test]
    fn test_zero_max_files_keeps_one_backup() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");

        for generation in 0..3 {
            fs::write(&path, generation.to_string()).unwrap();
            serial_rotation::<()>(0)("id", path.as_path(), &()).unwrap();
        }

        assert_eq!(backups(&path), vec![0]);
        assert_eq!(fs::read_to_string(backup_path(&path, 0)).unwrap(), "2");
    }

    #[test]
    fn test_missing_live_file_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.log");

        let err = rotate_backups(&path, 3).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_size_rotation_bumps_past_threshold() {
        let next_id = size_rotation::<()>(4);
        let memory = MemoryHandle::new();
        let handle: &dyn WriteHandle = &memory;

        assert_eq!(next_id(None, &()).unwrap(), "0");

        handle.write(b"test").unwrap();
        assert_eq!(next_id(Some(handle), &()).unwrap(), "0");

        handle.write(b"test").unwrap();
        assert_eq!(next_id(Some(handle), &()).unwrap(), "1");
    }
}
