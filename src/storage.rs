//! Filesystem persistence of the document file.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::crypto::secure_random;
use crate::error::Result;

/// Location of the document on disk.
#[derive(Debug, Clone)]
pub struct Storage {
    path: PathBuf,
}

impl Storage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the whole document file.
    pub fn load(&self) -> Result<Vec<u8>> {
        Ok(fs::read(&self.path)?)
    }

    /// Fails unless the document file could be written right now.
    ///
    /// An existing file must open for writing. Otherwise the parent
    /// directory is created and a probe file is created and removed in it.
    /// Nothing about the document itself changes.
    pub fn check_writable(&self) -> Result<()> {
        if self.path.exists() {
            OpenOptions::new().write(true).open(&self.path)?;
            return Ok(());
        }

        let parent = self.parent();
        fs::create_dir_all(parent)?;
        let probe = self.sibling("probe")?;
        OpenOptions::new().write(true).create_new(true).open(&probe)?;
        fs::remove_file(&probe)?;
        debug!(path = %self.path.display(), "storage location is writable");
        Ok(())
    }

    /// Replaces the document file atomically.
    ///
    /// The data goes to a fresh sibling file which is synced and then
    /// renamed over the target, so a crash leaves either the old or the new
    /// document. Missing parent directories are created.
    pub fn save(&self, data: &[u8]) -> Result<()> {
        let parent = self.parent();
        fs::create_dir_all(parent)?;

        let tmp_path = self.sibling("tmp")?;
        let mut tmp_file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)?;
        tmp_file.write_all(data)?;
        tmp_file.sync_all()?;
        drop(tmp_file);

        if let Err(e) = self.atomic_replace(&tmp_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        // persist the rename
        if !parent.as_os_str().is_empty() {
            File::open(parent)?.sync_all()?;
        }
        Ok(())
    }

    fn parent(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new(""))
    }

    /// `<file name>.<tag>.<16 random hex digits>` next to the document.
    fn sibling(&self, tag: &str) -> Result<PathBuf> {
        let mut buf = [0u8; 8];
        secure_random(&mut buf)?;
        let suffix: String = buf.iter().map(|b| format!("{b:02x}")).collect();

        let file_name = self.path.file_name().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} does not name a file", self.path.display()),
            )
        })?;
        Ok(self.path.with_file_name(format!(
            "{}.{tag}.{suffix}",
            file_name.to_string_lossy()
        )))
    }

    #[cfg(target_os = "windows")]
    fn atomic_replace(&self, tmp_path: &Path) -> io::Result<()> {
        use std::ffi::OsStr;
        use std::os::windows::ffi::OsStrExt;
        use windows_sys::Win32::Storage::FileSystem::{
            MOVEFILE_REPLACE_EXISTING, MOVEFILE_WRITE_THROUGH, MoveFileExW,
        };

        fn wide(s: &OsStr) -> Vec<u16> {
            s.encode_wide().chain(std::iter::once(0)).collect()
        }

        let target = wide(self.path.as_os_str());
        let tmp = wide(tmp_path.as_os_str());

        // SAFETY: both buffers are NUL-terminated UTF-16 and outlive the call.
        let ok = unsafe {
            MoveFileExW(
                tmp.as_ptr(),
                target.as_ptr(),
                MOVEFILE_REPLACE_EXISTING | MOVEFILE_WRITE_THROUGH,
            )
        };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// `rename` is atomic within one filesystem.
    #[cfg(not(target_os = "windows"))]
    fn atomic_replace(&self, tmp_path: &Path) -> io::Result<()> {
        fs::rename(tmp_path, &self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use tempfile::tempdir;

    fn entries(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn load_returns_saved_data() {
        let dir = tempdir().unwrap();
        let storage = Storage::new(dir.path().join("cardnest.xml"));
        storage.save(b"<cardnest/>").unwrap();
        assert_eq!(storage.load().unwrap(), b"<cardnest/>");
    }

    #[test]
    fn load_of_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let storage = Storage::new(dir.path().join("missing.xml"));
        assert!(!storage.exists());
        assert!(matches!(storage.load(), Err(Error::Io(_))));
    }

    #[test]
    fn save_replaces_and_leaves_no_temporaries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cardnest.xml");
        let storage = Storage::new(&path);

        storage.save(b"first").unwrap();
        storage.save(&vec![42u8; 10_000]).unwrap();

        assert_eq!(fs::read(&path).unwrap(), vec![42u8; 10_000]);
        assert_eq!(entries(dir.path()), ["cardnest.xml"]);
    }

    #[test]
    fn save_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a").join("b").join("cardnest.xml");
        Storage::new(&nested).save(b"data").unwrap();
        assert!(nested.exists());
    }

    #[test]
    fn sibling_names_are_unique_and_local() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cardnest.xml");
        let storage = Storage::new(&path);

        let a = storage.sibling("tmp").unwrap();
        let b = storage.sibling("tmp").unwrap();
        assert_ne!(a, b);
        assert_ne!(a, path);
        assert_eq!(a.parent(), path.parent());
        assert!(a.file_name().unwrap().to_string_lossy().starts_with("cardnest.xml.tmp."));
    }

    #[test]
    fn check_writable_leaves_no_trace() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("new").join("cardnest.xml");
        let storage = Storage::new(&path);

        storage.check_writable().unwrap();
        assert!(!path.exists());
        assert!(entries(&dir.path().join("new")).is_empty());
    }

    #[test]
    fn check_writable_keeps_existing_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cardnest.xml");
        let storage = Storage::new(&path);
        storage.save(b"keep me").unwrap();

        storage.check_writable().unwrap();
        assert_eq!(storage.load().unwrap(), b"keep me");
    }

    #[test]
    fn check_writable_fails_when_parent_is_a_file() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"x").unwrap();

        let storage = Storage::new(blocker.join("cardnest.xml"));
        assert!(matches!(storage.check_writable(), Err(Error::Io(_))));
    }

    #[cfg(unix)]
    #[test]
    fn check_writable_fails_on_read_only_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("cardnest.xml");
        fs::write(&path, b"x").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o444)).unwrap();

        // root ignores permission bits
        if OpenOptions::new().write(true).open(&path).is_ok() {
            return;
        }
        assert!(Storage::new(&path).check_writable().is_err());
    }
}
