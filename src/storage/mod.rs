use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to mount storage at {path:?}: {source}")]
    Mount { path: PathBuf, source: io::Error },

    #[error("Storage root {0:?} is not a directory")]
    NotADirectory(PathBuf),

    #[error("Unable to open stream {name:?}: {source}")]
    Open { name: String, source: io::Error },
}

/// Byte stream the frame source pulls from.
///
/// No format is imposed; the source decides what the bytes mean.
pub trait MediaStream: Send {
    /// Read until `buf` is full or the stream ends. Returns bytes transferred,
    /// 0 at end of stream.
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Move the cursor forward (positive) or backward (negative).
    fn seek_by(&mut self, offset: i64) -> io::Result<()>;

    fn rewind_to_start(&mut self) -> io::Result<()>;
}

impl<T: Read + Seek + Send> MediaStream for T {
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    fn seek_by(&mut self, offset: i64) -> io::Result<()> {
        self.seek(SeekFrom::Current(offset)).map(|_| ())
    }

    fn rewind_to_start(&mut self) -> io::Result<()> {
        self.seek(SeekFrom::Start(0)).map(|_| ())
    }
}

/// A mounted directory that named streams are opened from.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn mount(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        let meta = std::fs::metadata(&root).map_err(|source| StorageError::Mount {
            path: root.clone(),
            source,
        })?;
        if !meta.is_dir() {
            return Err(StorageError::NotADirectory(root));
        }
        Ok(Self { root })
    }

    /// Storage rooted at `root` without checking it; opens fail later if it is missing.
    pub fn unmounted(root: impl AsRef<Path>) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn open(&self, name: &str) -> Result<File, StorageError> {
        File::open(self.root.join(name)).map_err(|source| StorageError::Open {
            name: name.to_string(),
            source,
        })
    }
}
