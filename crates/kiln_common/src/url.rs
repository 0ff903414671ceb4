//! Stable file identities used as cache keys.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Scheme prefix of every [`FileUrl`].
const FILE_SCHEME: &str = "file://";

/// A stable, normalized identity for a file or directory on the local file system.
///
/// The URL is `file://` followed by the lexically normalized path with `/`
/// separators. It is the key of every persisted cache, so two spellings of
/// the same path (`a/./b`, `a/c/../b`) must produce the same URL.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FileUrl(String);

impl FileUrl {
    /// Builds the URL of `path`, normalizing `.` and `..` components lexically.
    pub fn from_path(path: &Path) -> Self {
        let mut parts: Vec<String> = Vec::new();
        let mut prefix = String::new();
        for component in path.components() {
            match component {
                Component::Prefix(p) => prefix = p.as_os_str().to_string_lossy().into_owned(),
                Component::RootDir => prefix.push('/'),
                Component::CurDir => {}
                Component::ParentDir => match parts.last().map(String::as_str) {
                    Some("..") | None if !prefix.ends_with('/') => parts.push("..".to_string()),
                    Some(_) => {
                        parts.pop();
                    }
                    None => {}
                },
                Component::Normal(name) => parts.push(name.to_string_lossy().replace('\\', "/")),
            }
        }
        Self(format!("{FILE_SCHEME}{prefix}{}", parts.join("/")))
    }

    /// Parses a `file://` URL string. Returns `None` for any other scheme.
    pub fn parse(url: &str) -> Option<Self> {
        let path = url.strip_prefix(FILE_SCHEME)?;
        Some(Self::from_path(Path::new(path)))
    }

    /// Returns the URL as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the path part of the URL (without the scheme).
    pub fn path_str(&self) -> &str {
        &self.0[FILE_SCHEME.len()..]
    }

    /// Converts the URL back to a file system path.
    pub fn to_path(&self) -> PathBuf {
        PathBuf::from(self.path_str())
    }

    /// Returns `true` if `self` equals `ancestor` or lies beneath it.
    pub fn is_under(&self, ancestor: &FileUrl) -> bool {
        let own = self.path_str();
        let anc = ancestor.path_str().trim_end_matches('/');
        if own == anc {
            return true;
        }
        own.len() > anc.len() && own.starts_with(anc) && own.as_bytes()[anc.len()] == b'/'
    }

    /// Returns the path of `self` relative to `ancestor`, with `/` separators.
    pub fn relative_to(&self, ancestor: &FileUrl) -> Option<&str> {
        if !self.is_under(ancestor) {
            return None;
        }
        let anc = ancestor.path_str().trim_end_matches('/');
        Some(self.path_str()[anc.len()..].trim_start_matches('/'))
    }

    /// Returns the final path component.
    pub fn file_name(&self) -> &str {
        self.path_str().rsplit('/').next().unwrap_or("")
    }
}

impl From<&Path> for FileUrl {
    fn from(path: &Path) -> Self {
        Self::from_path(path)
    }
}

impl From<&PathBuf> for FileUrl {
    fn from(path: &PathBuf) -> Self {
        Self::from_path(path)
    }
}

impl fmt::Display for FileUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for FileUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileUrl({})", self.0)
    }
}
