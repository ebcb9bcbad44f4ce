use std::fs::{self, Permissions};
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;

use camino::Utf8Path;
use tempfile::Builder;

pub(super) const PID_FILE_MODE: u32 = 0o644;

/// Replaces `path` with `contents` through a temporary sibling and a rename.
///
/// Readers polling the path see either the previous file or the complete new
/// one, never a truncated payload.
pub(super) fn atomic_write(path: &Utf8Path, contents: &[u8]) -> io::Result<()> {
    let directory = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or(Utf8Path::new("."));

    let mut file = Builder::new()
        .prefix(path.file_name().unwrap_or("warden"))
        .suffix(".tmp")
        .permissions(Permissions::from_mode(PID_FILE_MODE))
        .tempfile_in(directory)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|error| error.error)?;
    Ok(())
}

/// Removes `path`, treating an already missing file as success.
pub(super) fn remove_if_present(path: &Utf8Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(error) => Err(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;

    #[test]
    fn atomic_write_replaces_existing_content() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = Utf8PathBuf::from_path_buf(dir.path().join("state")).expect("utf-8 path");
        fs::write(&path, "old contents").expect("seed file");

        atomic_write(&path, b"new").expect("write should succeed");

        assert_eq!(fs::read_to_string(&path).expect("read back"), "new");
        let leftovers = fs::read_dir(dir.path()).expect("list dir").count();
        assert_eq!(leftovers, 1, "temporary file should have been renamed");
    }

    #[test]
    fn removing_a_missing_file_reports_false() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = Utf8PathBuf::from_path_buf(dir.path().join("absent")).expect("utf-8 path");
        assert!(!remove_if_present(&path).expect("missing file is fine"));
    }
}
