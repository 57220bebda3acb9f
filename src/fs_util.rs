use std::fs;
use std::path::Path;

use camino::Utf8Path;

use crate::error::F4stError;

/// Creates `dir` and its parents. Existing directories are fine.
pub fn ensure_dir(dir: &Utf8Path) -> Result<(), F4stError> {
    fs::create_dir_all(dir.as_std_path())
        .map_err(|err| F4stError::Filesystem(format!("create {dir}: {err}")))
}

/// Runs `write` against a temporary file next to `dest` and moves the result
/// into place only if it succeeded, so `dest` never holds a partial file.
pub fn write_atomic<F>(dest: &Utf8Path, write: F) -> Result<(), F4stError>
where
    F: FnOnce(&Path) -> Result<(), F4stError>,
{
    let parent = dest
        .parent()
        .ok_or_else(|| F4stError::Filesystem(format!("invalid destination path {dest}")))?;
    let temp = tempfile::Builder::new()
        .prefix(".f4st-partial")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| F4stError::Filesystem(err.to_string()))?;
    write(temp.path())?;
    temp.persist(dest.as_std_path())
        .map_err(|err| F4stError::Filesystem(err.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;

    use super::*;

    #[test]
    fn failed_write_leaves_no_file() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let dest = root.join("file.fits");

        let result = write_atomic(&dest, |_| Err(F4stError::TransferHttp("reset".to_string())));
        assert!(result.is_err());
        assert!(!dest.as_std_path().exists());
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[test]
    fn existing_file_is_replaced() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let dest = root.join("file.fits");
        fs::write(dest.as_std_path(), b"old").unwrap();

        write_atomic(&dest, |path| {
            fs::write(path, b"new").map_err(|err| F4stError::Filesystem(err.to_string()))
        })
        .unwrap();

        assert_eq!(fs::read(dest.as_std_path()).unwrap(), b"new");
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 1);
    }

    #[test]
    fn ensure_dir_is_idempotent() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let dir = root.join("a").join("b");
        ensure_dir(&dir).unwrap();
        ensure_dir(&dir).unwrap();
        assert!(dir.as_std_path().is_dir());
    }
}
