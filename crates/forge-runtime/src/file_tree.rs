//! In-memory file tree mounted into a sandbox on boot.
//!
//! The serialized form matches the nested `{ name: { file: { contents } } }`
//! / `{ name: { directory: { ... } } }` shape browser sandboxes accept, so a
//! tree can be handed to either a local or a remote runtime unchanged.

use crate::error::{Result, RuntimeError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

/// A node in a [`FileTree`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileNode {
    /// Regular file.
    File {
        /// UTF-8 file contents.
        contents: String,
    },
    /// Nested directory.
    Directory(FileTree),
}

/// Directory tree keyed by entry name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileTree {
    entries: BTreeMap<String, FileNode>,
}

impl FileTree {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file at a `/`-separated path, creating intermediate directories.
    pub fn with_file(mut self, path: &str, contents: impl Into<String>) -> Self {
        self.insert(path, contents);
        self
    }

    /// Insert or replace a file at a `/`-separated path.
    ///
    /// A file sitting where a directory is needed is replaced by the directory.
    pub fn insert(&mut self, path: &str, contents: impl Into<String>) {
        let mut parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        let Some(name) = parts.pop() else {
            return;
        };

        let mut dir = self;
        for part in parts {
            let node = dir
                .entries
                .entry(part.to_string())
                .or_insert_with(|| FileNode::Directory(FileTree::new()));
            if !matches!(node, FileNode::Directory(_)) {
                *node = FileNode::Directory(FileTree::new());
            }
            dir = match node {
                FileNode::Directory(tree) => tree,
                FileNode::File { .. } => unreachable!("replaced above"),
            };
        }

        dir.entries.insert(
            name.to_string(),
            FileNode::File {
                contents: contents.into(),
            },
        );
    }

    /// Look up a file's contents by `/`-separated path.
    pub fn get(&self, path: &str) -> Option<&str> {
        let mut parts = path.split('/').filter(|p| !p.is_empty()).peekable();
        let mut dir = self;
        while let Some(part) = parts.next() {
            match (dir.entries.get(part)?, parts.peek()) {
                (FileNode::File { contents }, None) => return Some(contents),
                (FileNode::Directory(tree), Some(_)) => dir = tree,
                _ => return None,
            }
        }
        None
    }

    /// Flatten into `(relative path, contents)` pairs in lexical order.
    pub fn files(&self) -> Vec<(String, &str)> {
        let mut out = Vec::new();
        self.collect_files("", &mut out);
        out
    }

    fn collect_files<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a str)>) {
        for (name, node) in &self.entries {
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{prefix}/{name}")
            };
            match node {
                FileNode::File { contents } => out.push((path, contents)),
                FileNode::Directory(tree) => tree.collect_files(&path, out),
            }
        }
    }

    /// Number of files (not directories) in the tree.
    pub fn len(&self) -> usize {
        self.files().len()
    }

    /// True if the tree holds no files.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write every file under `root`, creating directories as needed.
    pub async fn write_to(&self, root: &Path) -> Result<()> {
        for (path, contents) in self.files() {
            let target = resolve_in_root(root, &path)?;
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&target, contents).await?;
            tracing::trace!(path = %target.display(), size = contents.len(), "Mounted file");
        }
        Ok(())
    }
}

/// Resolve a sandbox path (absolute or relative) against a host root.
///
/// Rejects paths that would escape `root`.
pub fn resolve_in_root(root: &Path, sandbox_path: &str) -> Result<PathBuf> {
    let relative = sandbox_path.trim_start_matches('/');
    if relative.is_empty() {
        return Err(RuntimeError::InvalidPath(sandbox_path.to_string()));
    }

    let mut resolved = root.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            _ => return Err(RuntimeError::InvalidPath(sandbox_path.to_string())),
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get_nested() {
        let tree = FileTree::new()
            .with_file("package.json", "{}")
            .with_file("/src/App.tsx", "export default 1;\n");

        assert_eq!(tree.get("package.json"), Some("{}"));
        assert_eq!(tree.get("src/App.tsx"), Some("export default 1;\n"));
        assert_eq!(tree.get("/src/App.tsx"), Some("export default 1;\n"));
        assert_eq!(tree.get("src"), None);
        assert_eq!(tree.get("missing.txt"), None);
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn test_files_are_flattened_in_order() {
        let tree = FileTree::new()
            .with_file("src/main.tsx", "main")
            .with_file("index.html", "html")
            .with_file("src/App.tsx", "app");

        let paths: Vec<String> = tree.files().into_iter().map(|(p, _)| p).collect();
        assert_eq!(paths, vec!["index.html", "src/App.tsx", "src/main.tsx"]);
    }

    #[test]
    fn test_serializes_in_sandbox_shape() {
        let tree = FileTree::new().with_file("src/App.tsx", "x");
        let json = serde_json::to_value(&tree).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "src": { "directory": { "App.tsx": { "file": { "contents": "x" } } } }
            })
        );
    }

    #[test]
    fn test_resolve_rejects_escape() {
        let root = Path::new("/tmp/forge");
        assert_eq!(
            resolve_in_root(root, "/src/App.tsx").unwrap(),
            PathBuf::from("/tmp/forge/src/App.tsx")
        );
        assert!(resolve_in_root(root, "../etc/passwd").is_err());
        assert!(resolve_in_root(root, "/").is_err());
    }

    #[tokio::test]
    async fn test_write_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let tree = FileTree::new()
            .with_file("a.txt", "alpha")
            .with_file("nested/deep/b.txt", "beta");

        tree.write_to(dir.path()).await.unwrap();

        let b = tokio::fs::read_to_string(dir.path().join("nested/deep/b.txt"))
            .await
            .unwrap();
        assert_eq!(b, "beta");
    }
}
