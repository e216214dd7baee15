//! Traversal data types
//!
//! Paths travel between the scanner and the checker process, so they are
//! kept as raw OS bytes rather than `String` to survive non-UTF-8 names.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::fs::FileType;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};

/// An absolute directory path produced by the walk
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DirPath(PathBuf);

impl DirPath {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Path of a child entry
    pub fn join(&self, name: &OsStr) -> Self {
        Self(self.0.join(name))
    }
}

impl AsRef<Path> for DirPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl From<&str> for DirPath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<PathBuf> for DirPath {
    fn from(path: PathBuf) -> Self {
        Self(path)
    }
}

impl fmt::Display for DirPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl Serialize for DirPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(self.0.as_os_str().as_bytes())
    }
}

impl<'de> Deserialize<'de> for DirPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = Vec::<u8>::deserialize(deserializer)?;
        Ok(Self(PathBuf::from(OsString::from_vec(bytes))))
    }
}

/// One BFS frontier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    /// Depth from the root (0 = root)
    pub depth: u32,

    /// Directories at this depth
    pub paths: Vec<DirPath>,
}

impl Batch {
    pub fn new(depth: u32, paths: Vec<DirPath>) -> Self {
        Self { depth, paths }
    }

    /// The seed batch
    pub fn root(path: impl Into<DirPath>) -> Self {
        Self {
            depth: 0,
            paths: vec![path.into()],
        }
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// What flows through every channel of the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Message<T> {
    /// A unit of work
    Work(T),
    /// No more work will arrive
    Shutdown,
}

impl<T> Message<T> {
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Message::Shutdown)
    }
}

/// Kind of a directory entry, decided once from `lstat`-style file type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// Regular file
    File,
    /// Directory
    Directory,
    /// Symbolic link (never followed)
    Symlink,
    /// Device, FIFO, socket
    Other,
}

impl EntryKind {
    pub fn is_dir(&self) -> bool {
        *self == EntryKind::Directory
    }
}

impl From<FileType> for EntryKind {
    fn from(file_type: FileType) -> Self {
        if file_type.is_symlink() {
            EntryKind::Symlink
        } else if file_type.is_dir() {
            EntryKind::Directory
        } else if file_type.is_file() {
            EntryKind::File
        } else {
            EntryKind::Other
        }
    }
}

/// A listed directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub path: DirPath,
    pub kind: EntryKind,
}
