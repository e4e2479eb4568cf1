//! Whole-file slurping with close-on-exec descriptors.

#![allow(unsafe_code)]

use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use thiserror::Error;

/// Why [`read_file`] failed.  Open failures are distinguished from
/// everything after the open, because callers probing optional files only
/// want to ignore the former.
#[derive(Debug, Error)]
pub enum FileError {
    #[error("could not open file: {0}")]
    Open(#[source] io::Error),
    #[error("could not read file: {0}")]
    Read(#[source] io::Error),
}

/// Open `path` read-only with `O_CLOEXEC`, so the descriptor never leaks
/// across an exec.  Used for every file this library opens internally.
pub fn open_cloexec(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_CLOEXEC)
        .open(path)
}

/// Read the entire contents of `path` into a byte vector.
pub fn read_file(path: &Path) -> Result<Vec<u8>, FileError> {
    let mut file = open_cloexec(path).map_err(FileError::Open)?;
    let size = file
        .metadata()
        .map(|m| usize::try_from(m.len()).unwrap_or(0))
        .unwrap_or(0);
    let mut contents = Vec::with_capacity(size);
    file.read_to_end(&mut contents).map_err(FileError::Read)?;
    Ok(contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_whole_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"some\0binary\xffdata").unwrap();
        let contents = read_file(tmp.path()).unwrap();
        assert_eq!(contents, b"some\0binary\xffdata");
    }

    #[test]
    fn missing_file_is_an_open_error() {
        let err = read_file(Path::new("/nonexistent/keelson-test")).unwrap_err();
        assert!(matches!(err, FileError::Open(_)));
    }

    #[test]
    fn descriptor_is_cloexec() {
        use std::os::fd::AsRawFd;
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let file = open_cloexec(tmp.path()).unwrap();
        let flags = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_GETFD) };
        assert!(flags >= 0 && (flags & libc::FD_CLOEXEC) != 0);
    }
}
