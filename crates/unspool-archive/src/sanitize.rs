use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Canonical extraction directory that every entry must stay inside.
#[derive(Clone, Debug)]
pub struct DestinationRoot {
    root: PathBuf,
}

impl DestinationRoot {
    /// Create `dir` if needed and pin its canonical absolute form.
    pub fn prepare(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| Error::DirectoryCreationFailed {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let root = dir.canonicalize()?;
        Ok(Self { root })
    }

    #[cfg(test)]
    fn from_canonical(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Join an untrusted archive name onto the root.
    ///
    /// Root and prefix components of the name are dropped, `.` is skipped
    /// and `..` pops. The result must lie strictly below the root; the root
    /// itself is only returned when `allow_root` is set.
    pub fn resolve(&self, name: &Path, allow_root: bool) -> Result<PathBuf> {
        let mut resolved = self.root.clone();
        for component in name.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::ParentDir => {
                    resolved.pop();
                }
                Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            }
        }

        let inside = resolved.starts_with(&self.root)
            && (resolved != self.root || allow_root);
        if !inside {
            return Err(Error::IllegalPath {
                entry: name.to_path_buf(),
            });
        }
        Ok(resolved)
    }

    /// Refuse `path` if anything between the root and it is a symlink.
    ///
    /// `path` must come from [`DestinationRoot::resolve`]. Components that do
    /// not exist yet are fine; everything below them will be created as
    /// plain directories. `path` itself is checked too.
    pub fn check_no_symlinks(&self, path: &Path, entry: &Path) -> Result<()> {
        let relative = path.strip_prefix(&self.root).map_err(|_| Error::IllegalPath {
            entry: entry.to_path_buf(),
        })?;

        let mut current = self.root.clone();
        for component in relative.components() {
            current.push(component);
            match fs::symlink_metadata(&current) {
                Ok(meta) if meta.file_type().is_symlink() => {
                    return Err(Error::IllegalPath {
                        entry: entry.to_path_buf(),
                    });
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// Check that `name` can be used as a single file name inside a directory.
pub fn validate_file_name(name: &str) -> Result<&str> {
    let single = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains(std::path::MAIN_SEPARATOR);
    if !single {
        return Err(Error::IllegalPath {
            entry: PathBuf::from(name),
        });
    }
    Ok(name)
}
