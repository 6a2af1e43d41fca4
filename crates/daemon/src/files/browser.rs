//! Directory listing for resolved paths.

use std::fs;
use std::path::Path;
use std::time::SystemTime;

use protocol::messages::{FileEntry, FileEntryType};
use tracing::debug;

use super::resolver::{ensure_contained, BaseRoot, ResolvedPath};
use super::{FileError, FileResult};

/// A directory entry with metadata.
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    /// Entry name (not full path).
    pub name: String,
    pub entry_type: FileEntryType,
    /// Size in bytes (0 for directories).
    pub size: u64,
    pub modified: SystemTime,
}

impl DirectoryEntry {
    /// Convert to protocol FileEntry.
    pub fn to_protocol(&self) -> FileEntry {
        let modified = self
            .modified
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        FileEntry {
            name: self.name.clone(),
            entry_type: self.entry_type,
            size: self.size,
            modified,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.entry_type, FileEntryType::Directory)
    }
}

/// Listing behaviour, taken from the `[file]` config section.
#[derive(Debug, Clone, Copy)]
pub struct ListOptions {
    /// Include names starting with '.'.
    pub include_hidden: bool,
    /// Directories first, then case-insensitive name.
    pub sort: bool,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            include_hidden: true,
            sort: true,
        }
    }
}

/// Lists the direct children of a resolved directory.
///
/// Symlinked children are reported with the type of their target. Children
/// whose target is missing or lies outside the base root are left out, as
/// are children that disappear while the listing is being built.
#[derive(Debug, Clone)]
pub struct DirectoryLister {
    root: BaseRoot,
    options: ListOptions,
}

impl DirectoryLister {
    pub fn new(root: BaseRoot, options: ListOptions) -> Self {
        Self { root, options }
    }

    pub fn options(&self) -> ListOptions {
        self.options
    }

    /// List `dir`. Fails with `NotFound` if it does not exist and
    /// `NotADirectory` if it is a file (download it instead).
    pub fn list(&self, dir: &ResolvedPath) -> FileResult<Vec<DirectoryEntry>> {
        let metadata =
            fs::metadata(dir.path()).map_err(|e| FileError::from_io(e, dir.relative()))?;
        if !metadata.is_dir() {
            return Err(FileError::NotADirectory(dir.relative().to_string()));
        }

        let entries = fs::read_dir(dir.path()).map_err(|e| FileError::from_io(e, dir.relative()))?;

        let mut results = Vec::new();
        for entry_result in entries {
            let entry = match entry_result {
                Ok(e) => e,
                Err(e) => {
                    debug!(dir = %dir.relative(), error = %e, "skipping unreadable entry");
                    continue;
                }
            };

            let name = entry.file_name().to_string_lossy().into_owned();
            if !self.options.include_hidden && name.starts_with('.') {
                continue;
            }

            if let Some(item) = self.describe(&entry.path(), name) {
                results.push(item);
            }
        }

        if self.options.sort {
            results.sort_by(|a, b| {
                b.is_dir()
                    .cmp(&a.is_dir())
                    .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
                    .then_with(|| a.name.cmp(&b.name))
            });
        }

        Ok(results)
    }

    fn describe(&self, path: &Path, name: String) -> Option<DirectoryEntry> {
        let link = fs::symlink_metadata(path).ok()?;
        if link.file_type().is_symlink() {
            let target = fs::canonicalize(path).ok()?;
            if ensure_contained(self.root.canonical(), &target).is_err() {
                debug!(entry = %name, "hiding symlink that leaves the base root");
                return None;
            }
        }

        // Follows symlinks; fails if the child vanished in the meantime.
        let metadata = match fs::metadata(path) {
            Ok(m) => m,
            Err(e) => {
                debug!(entry = %name, error = %e, "skipping entry without metadata");
                return None;
            }
        };

        let (entry_type, size) = if metadata.is_dir() {
            (FileEntryType::Directory, 0)
        } else {
            (FileEntryType::File, metadata.len())
        };

        Some(DirectoryEntry {
            name,
            entry_type,
            size,
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::PathResolver;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    fn setup(options: ListOptions) -> (TempDir, PathResolver, DirectoryLister) {
        let temp = TempDir::new().unwrap();
        let base = temp.path().join("data");
        fs::create_dir_all(base.join("subdir")).unwrap();
        fs::create_dir_all(base.join(".hidden_dir")).unwrap();
        fs::write(base.join("file.txt"), "Hello").unwrap();
        fs::write(base.join("subdir/nested.txt"), "Nested").unwrap();
        fs::write(base.join(".hidden"), "Hidden").unwrap();

        let root = BaseRoot::new(&base).unwrap();
        let resolver = PathResolver::new(root.clone());
        (temp, resolver, DirectoryLister::new(root, options))
    }

    fn names(entries: &[DirectoryEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.name.as_str()).collect()
    }

    #[test]
    fn test_list_root_default_options() {
        let (_temp, resolver, lister) = setup(ListOptions::default());
        let entries = lister.list(&resolver.resolve("").unwrap()).unwrap();

        assert_eq!(
            names(&entries),
            vec![".hidden_dir", "subdir", ".hidden", "file.txt"]
        );
        assert!(entries[1].is_dir());
        assert_eq!(entries[1].size, 0);
        assert_eq!(entries[3].size, 5);
    }

    #[test]
    fn test_list_without_hidden() {
        let (_temp, resolver, lister) = setup(ListOptions {
            include_hidden: false,
            sort: true,
        });
        let entries = lister.list(&resolver.resolve("/").unwrap()).unwrap();
        assert_eq!(names(&entries), vec!["subdir", "file.txt"]);
    }

    #[test]
    fn test_list_unsorted_has_same_entries() {
        let (_temp, resolver, lister) = setup(ListOptions {
            include_hidden: true,
            sort: false,
        });
        let mut got: Vec<String> = lister
            .list(&resolver.resolve("").unwrap())
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        got.sort();
        assert_eq!(got, vec![".hidden", ".hidden_dir", "file.txt", "subdir"]);
    }

    #[test]
    fn test_sorting_is_case_insensitive() {
        let (_temp, resolver, lister) = setup(ListOptions::default());
        let base = resolver.root().canonical().to_path_buf();
        fs::write(base.join("Zebra.txt"), "z").unwrap();
        fs::write(base.join("apple.txt"), "a").unwrap();
        fs::create_dir(base.join("Beta")).unwrap();

        let entries = lister.list(&resolver.resolve("").unwrap()).unwrap();
        assert_eq!(
            names(&entries),
            vec![
                ".hidden_dir",
                "Beta",
                "subdir",
                ".hidden",
                "apple.txt",
                "file.txt",
                "Zebra.txt"
            ]
        );
    }

    #[test]
    fn test_list_nested() {
        let (_temp, resolver, lister) = setup(ListOptions::default());
        let entries = lister.list(&resolver.resolve("subdir").unwrap()).unwrap();
        assert_eq!(names(&entries), vec!["nested.txt"]);
    }

    #[test]
    fn test_list_is_idempotent() {
        let (_temp, resolver, lister) = setup(ListOptions::default());
        let dir = resolver.resolve("").unwrap();
        let first: Vec<FileEntry> = lister.list(&dir).unwrap().iter().map(|e| e.to_protocol()).collect();
        let second: Vec<FileEntry> = lister.list(&dir).unwrap().iter().map(|e| e.to_protocol()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_list_file_is_not_a_directory() {
        let (_temp, resolver, lister) = setup(ListOptions::default());
        let result = lister.list(&resolver.resolve("file.txt").unwrap());
        assert!(matches!(result, Err(FileError::NotADirectory(p)) if p == "file.txt"));
    }

    #[test]
    fn test_list_missing_is_not_found() {
        let (_temp, resolver, lister) = setup(ListOptions::default());
        let result = lister.list(&resolver.resolve("nope").unwrap());
        assert!(matches!(result, Err(FileError::NotFound(p)) if p == "nope"));
    }

    #[test]
    fn test_vanished_child_is_skipped() {
        let (temp, resolver, lister) = setup(ListOptions::default());
        let base = resolver.root().canonical().to_path_buf();
        let gone = base.join("file.txt");
        fs::remove_file(&gone).unwrap();

        // As if the child was enumerated and then removed before being described
        assert!(lister.describe(&gone, "file.txt".to_string()).is_none());

        // A link whose target is removed after it was created
        fs::write(temp.path().join("data/subdir/target.txt"), "x").unwrap();
        symlink(base.join("subdir/target.txt"), base.join("shortcut")).unwrap();
        fs::remove_file(base.join("subdir/target.txt")).unwrap();
        assert!(lister.describe(&base.join("shortcut"), "shortcut".to_string()).is_none());

        let entries = lister.list(&resolver.resolve("").unwrap()).unwrap();
        assert_eq!(names(&entries), vec![".hidden_dir", "subdir", ".hidden"]);
    }

    #[test]
    fn test_directory_removed_after_resolution_is_not_found() {
        let (_temp, resolver, lister) = setup(ListOptions::default());
        let dir = resolver.resolve("subdir").unwrap();
        fs::remove_dir_all(dir.path()).unwrap();

        assert!(matches!(
            lister.list(&dir),
            Err(FileError::NotFound(p)) if p == "subdir"
        ));
    }

    #[test]
    fn test_symlink_children() {
        let (temp, resolver, lister) = setup(ListOptions::default());
        let base = resolver.root().canonical().to_path_buf();
        fs::write(temp.path().join("secret.txt"), "outside").unwrap();

        symlink(base.join("subdir"), base.join("link_dir")).unwrap();
        symlink(base.join("file.txt"), base.join("link_file")).unwrap();
        symlink(temp.path().join("secret.txt"), base.join("leak")).unwrap();
        symlink(base.join("gone"), base.join("dangling")).unwrap();

        let entries = lister.list(&resolver.resolve("").unwrap()).unwrap();
        let listed = names(&entries);

        assert!(!listed.contains(&"leak"));
        assert!(!listed.contains(&"dangling"));

        let link_dir = entries.iter().find(|e| e.name == "link_dir").unwrap();
        assert!(link_dir.is_dir());
        let link_file = entries.iter().find(|e| e.name == "link_file").unwrap();
        assert_eq!(link_file.entry_type, FileEntryType::File);
        assert_eq!(link_file.size, 5);
    }

    #[test]
    fn test_entry_to_protocol() {
        let entry = DirectoryEntry {
            name: "test.txt".to_string(),
            entry_type: FileEntryType::File,
            size: 1024,
            modified: SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1704067200),
        };

        let proto = entry.to_protocol();
        assert_eq!(proto.name, "test.txt");
        assert_eq!(proto.entry_type, FileEntryType::File);
        assert_eq!(proto.size, 1024);
        assert_eq!(proto.modified, 1704067200);
    }
}
