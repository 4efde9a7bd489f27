use std::cmp::Ordering;
use std::path::Path;

use serde::Serialize;
use walkdir::{DirEntry, WalkDir};

use crate::error::RuntimeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Directory,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeNode {
    pub name: String,
    pub kind: NodeKind,
    /// Path relative to the extraction root, `/`-separated.
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectTree {
    pub nodes: Vec<TreeNode>,
    pub total_size: u64,
    pub file_count: usize,
}

/// Directories before files, then by name.
fn compare(a: &DirEntry, b: &DirEntry) -> Ordering {
    let a_dir = a.file_type().is_dir();
    let b_dir = b.file_type().is_dir();
    b_dir
        .cmp(&a_dir)
        .then_with(|| a.file_name().cmp(b.file_name()))
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Walks `root` into an ordered tree. Symlinks are left out.
pub fn build_tree(root: &Path) -> Result<ProjectTree, RuntimeError> {
    let mut total_size = 0u64;
    let mut file_count = 0usize;
    // stack[d] collects the children of the open node at depth d
    let mut stack: Vec<Vec<TreeNode>> = vec![Vec::new()];

    for entry in WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by(compare)
    {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            let source = e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("filesystem loop"));
            RuntimeError::io(path, source)
        })?;

        let depth = entry.depth();
        close_to_depth(&mut stack, depth);

        let file_type = entry.file_type();
        if file_type.is_symlink() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().into_owned();
        let path = relative_path(root, entry.path());

        if file_type.is_dir() {
            if let Some(siblings) = stack.last_mut() {
                siblings.push(TreeNode {
                    name,
                    kind: NodeKind::Directory,
                    path,
                    size: None,
                    children: Vec::new(),
                });
            }
            stack.push(Vec::new());
        } else {
            let size = entry
                .metadata()
                .map(|m| m.len())
                .map_err(|e| {
                    let source = e
                        .into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("metadata unavailable"));
                    RuntimeError::io(entry.path(), source)
                })?;
            total_size += size;
            file_count += 1;
            if let Some(siblings) = stack.last_mut() {
                siblings.push(TreeNode {
                    name,
                    kind: NodeKind::File,
                    path,
                    size: Some(size),
                    children: Vec::new(),
                });
            }
        }
    }
    close_to_depth(&mut stack, 1);

    Ok(ProjectTree {
        nodes: stack.pop().unwrap_or_default(),
        total_size,
        file_count,
    })
}

/// Closes open directories until the entry at `depth` can be added.
/// `stack.len() == depth` afterwards.
fn close_to_depth(stack: &mut Vec<Vec<TreeNode>>, depth: usize) {
    while stack.len() > depth {
        let Some(children) = stack.pop() else { break };
        let Some(parent_level) = stack.last_mut() else {
            stack.push(children);
            break;
        };
        if let Some(dir) = parent_level.last_mut() {
            dir.children = children;
        }
    }
}
