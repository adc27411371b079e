//! Binding to a vendor CT-API driver loaded at runtime.

use std::path::Path;

use libloading::{Library, Symbol};
use tracing::info;

use super::{CardError, CtError, Terminal};

type CtInit = unsafe extern "C" fn(ctn: u16, pn: u16) -> i8;
type CtData = unsafe extern "C" fn(
    ctn: u16,
    dad: *mut u8,
    sad: *mut u8,
    lenc: u16,
    command: *const u8,
    lenr: *mut u16,
    response: *mut u8,
) -> i8;
type CtClose = unsafe extern "C" fn(ctn: u16) -> i8;

/// A terminal driven through `CT_init`, `CT_data` and `CT_close`.
pub struct CtApiTerminal {
    init: CtInit,
    data: CtData,
    close: CtClose,
    // keeps the function pointers above valid
    _library: Library,
}

impl CtApiTerminal {
    /// Loads the driver library and resolves its three entry points.
    ///
    /// # Errors
    ///
    /// Returns [`CardError::NoSuchLibrary`] if the library cannot be loaded
    /// or any entry point is missing.
    pub fn load(path: &Path) -> Result<Self, CardError> {
        let no_such_library = |reason: String| CardError::NoSuchLibrary {
            path: path.to_path_buf(),
            reason,
        };

        // SAFETY: loading runs the library's initializers; the path comes
        // from the user's configuration and is expected to be a CT-API driver.
        let library = unsafe { Library::new(path) }.map_err(|e| no_such_library(e.to_string()))?;

        // SAFETY: the signatures match the CT-API entry points. The copied
        // function pointers never outlive `library`, which is stored alongside.
        let (init, data, close) = unsafe {
            let init: Symbol<CtInit> = library
                .get(b"CT_init\0")
                .map_err(|e| no_such_library(e.to_string()))?;
            let data: Symbol<CtData> = library
                .get(b"CT_data\0")
                .map_err(|e| no_such_library(e.to_string()))?;
            let close: Symbol<CtClose> = library
                .get(b"CT_close\0")
                .map_err(|e| no_such_library(e.to_string()))?;
            (*init, *data, *close)
        };

        info!(path = %path.display(), "loaded CT-API driver");
        Ok(Self {
            init,
            data,
            close,
            _library: library,
        })
    }
}

impl Terminal for CtApiTerminal {
    fn init(&mut self, ctn: u16, port: u16) -> Result<(), CtError> {
        // SAFETY: plain integer arguments.
        CtError::check(unsafe { (self.init)(ctn, port) })
    }

    fn exchange(
        &mut self,
        ctn: u16,
        dad: u8,
        command: &[u8],
        response: &mut [u8],
    ) -> Result<usize, CtError> {
        let lenc = u16::try_from(command.len()).map_err(|_| CtError::Invalid)?;
        let mut lenr = u16::try_from(response.len()).unwrap_or(u16::MAX);
        let mut dad = dad;
        let mut sad = super::apdu::SAD_HOST;

        // SAFETY: `command` is valid for `lenc` bytes and `response` for
        // `lenr` bytes; the driver writes at most `lenr` bytes back.
        let code = unsafe {
            (self.data)(
                ctn,
                &mut dad,
                &mut sad,
                lenc,
                command.as_ptr(),
                &mut lenr,
                response.as_mut_ptr(),
            )
        };
        CtError::check(code)?;
        Ok(usize::from(lenr).min(response.len()))
    }

    fn close(&mut self, ctn: u16) -> Result<(), CtError> {
        // SAFETY: plain integer argument.
        CtError::check(unsafe { (self.close)(ctn) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_library_is_no_such_library() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("libctapi-missing.so");

        match CtApiTerminal::load(&path) {
            Err(CardError::NoSuchLibrary { path: p, .. }) => assert_eq!(p, path),
            Err(other) => panic!("expected NoSuchLibrary, got {other}"),
            Ok(_) => panic!("loaded a library that does not exist"),
        }
    }

    #[test]
    fn non_library_file_is_no_such_library() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.so");
        std::fs::write(&path, b"not a shared object").unwrap();

        assert!(matches!(
            CtApiTerminal::load(&path),
            Err(CardError::NoSuchLibrary { .. })
        ));
    }
}
