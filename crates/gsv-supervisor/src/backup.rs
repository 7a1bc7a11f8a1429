//! Save-data archives.
//!
//! One archive per backup, named after the local time it was taken:
//!
//! ```text
//! backups/
//!   2024-01-01-00-00-00.zip
//!   2024-01-01-00-00-00-1.zip   (second backup in the same second)
//! ```
//!
//! Entries are stored relative to the save directory in name order, so
//! two archives of an unchanged tree list the same files.

use crate::error::{SupervisorError, SupervisorResult};
use chrono::{DateTime, Local};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Extension of every backup archive.
pub const ARCHIVE_EXTENSION: &str = "zip";
/// Local time, sortable as plain text.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// `2024-01-01-00-00-00.zip`
pub fn archive_name(at: &DateTime<Local>) -> String {
    format!("{}.{}", at.format(TIMESTAMP_FORMAT), ARCHIVE_EXTENSION)
}

/// Zip the whole `source` tree into a timestamped archive under `dest_dir`.
///
/// Two backups within the same second get a numeric suffix instead of
/// overwriting each other. Blocking; run it off the async runtime.
pub fn archive_dir(source: &Path, dest_dir: &Path, at: DateTime<Local>) -> SupervisorResult<PathBuf> {
    if !source.is_dir() {
        return Err(SupervisorError::backup(format!(
            "save directory {} does not exist",
            source.display()
        )));
    }
    std::fs::create_dir_all(dest_dir)?;

    let path = unique_path(dest_dir, &at);
    let file = File::create(&path)?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    add_tree(&mut zip, source, "", options)?;
    zip.finish().map_err(zip_error)?;

    debug!("Wrote archive {}", path.display());
    Ok(path)
}

/// `<stamp>.zip`, or `<stamp>-N.zip` when that name is taken.
fn unique_path(dest_dir: &Path, at: &DateTime<Local>) -> PathBuf {
    let stamp = at.format(TIMESTAMP_FORMAT).to_string();
    let mut path = dest_dir.join(archive_name(at));
    let mut n = 1;
    while path.exists() {
        path = dest_dir.join(format!("{}-{}.{}", stamp, n, ARCHIVE_EXTENSION));
        n += 1;
    }
    path
}

/// Add `dir` recursively under `prefix`, in name order.
fn add_tree(
    zip: &mut ZipWriter<File>,
    dir: &Path,
    prefix: &str,
    options: SimpleFileOptions,
) -> SupervisorResult<()> {
    let mut entries = std::fs::read_dir(dir)?.collect::<Result<Vec<_>, io::Error>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = format!("{}{}", prefix, entry.file_name().to_string_lossy());
        let path = entry.path();

        if entry.file_type()?.is_dir() {
            zip.add_directory(format!("{}/", name), options).map_err(zip_error)?;
            add_tree(zip, &path, &format!("{}/", name), options)?;
        } else {
            zip.start_file(name, options).map_err(zip_error)?;
            let mut file = File::open(&path)?;
            io::copy(&mut file, zip)?;
        }
    }
    Ok(())
}

/// Zip failures carry no path context of their own.
fn zip_error(e: zip::result::ZipError) -> SupervisorError {
    SupervisorError::backup(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Read;
    use tempfile::TempDir;
    use zip::ZipArchive;

    fn fixed_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn save_tree(root: &Path) -> PathBuf {
        let save = root.join("Saved");
        std::fs::create_dir_all(save.join("SaveGames/0/world")).unwrap();
        std::fs::write(save.join("SaveGames/0/world/Level.sav"), b"level-data").unwrap();
        std::fs::write(save.join("settings.ini"), b"[x]").unwrap();
        save
    }

    #[test]
    fn test_archive_name_format() {
        assert_eq!(archive_name(&fixed_time()), "2024-01-01-00-00-00.zip");
    }

    #[test]
    fn test_archive_contains_save_tree() {
        let dir = TempDir::new().unwrap();
        let save = save_tree(dir.path());
        let dest = dir.path().join("BackupSaved");

        let path = archive_dir(&save, &dest, fixed_time()).unwrap();
        assert_eq!(path, dest.join("2024-01-01-00-00-00.zip"));

        let mut archive = ZipArchive::new(File::open(&path).unwrap()).unwrap();
        let mut content = String::new();
        archive
            .by_name("SaveGames/0/world/Level.sav")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "level-data");
        assert!(archive.by_name("settings.ini").is_ok());
    }

    #[test]
    fn test_same_second_backups_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let save = save_tree(dir.path());
        let dest = dir.path().join("BackupSaved");

        let first = archive_dir(&save, &dest, fixed_time()).unwrap();
        let second = archive_dir(&save, &dest, fixed_time()).unwrap();
        assert_ne!(first, second);
        assert_eq!(second, dest.join("2024-01-01-00-00-00-1.zip"));
    }

    #[test]
    fn test_missing_source_fails() {
        let dir = TempDir::new().unwrap();
        let err = archive_dir(&dir.path().join("nope"), &dir.path().join("out"), fixed_time()).unwrap_err();
        assert!(matches!(err, SupervisorError::Backup { .. }));
    }
}
