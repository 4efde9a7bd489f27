//! Resolution of caller-supplied relative paths inside an extraction root.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SandboxError {
    #[error("absolute paths are not allowed: {0}")]
    AbsolutePath(String),

    #[error("path traversal is not allowed: {0}")]
    Traversal(String),

    #[error("path escapes the project root: {0}")]
    Escape(String),
}

/// Resolves `user_path` against `root`, rejecting anything that could land
/// outside of it.
///
/// Lexical checks run first and do not depend on the filesystem, so `..` and
/// absolute inputs are rejected whether or not the target exists. When the
/// target exists it is canonicalized and compared against the canonical root,
/// which catches symlinks pointing out of the tree.
pub fn resolve(root: &Path, user_path: &str) -> Result<PathBuf, SandboxError> {
    let candidate = Path::new(user_path);

    if candidate.is_absolute() || user_path.starts_with('/') || user_path.starts_with('\\') {
        return Err(SandboxError::AbsolutePath(user_path.to_string()));
    }

    let mut relative = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir => return Err(SandboxError::Traversal(user_path.to_string())),
            Component::RootDir | Component::Prefix(_) => {
                return Err(SandboxError::AbsolutePath(user_path.to_string()))
            }
        }
    }

    // Backslash separators are not components on unix but still mean traversal
    // to anything that later hands the path to another platform.
    if user_path.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(SandboxError::Traversal(user_path.to_string()));
    }

    let joined = root.join(&relative);

    if std::fs::symlink_metadata(&joined).is_ok() {
        let root_canonical = root
            .canonicalize()
            .map_err(|_| SandboxError::Escape(user_path.to_string()))?;
        let target_canonical = joined
            .canonicalize()
            .map_err(|_| SandboxError::Escape(user_path.to_string()))?;
        if !target_canonical.starts_with(&root_canonical) {
            return Err(SandboxError::Escape(user_path.to_string()));
        }
        return Ok(target_canonical);
    }

    Ok(joined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn root_with_file() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/index.html"), "<h1>hi</h1>").unwrap();
        dir
    }

    #[test]
    fn test_resolves_existing_file() {
        let dir = root_with_file();
        let resolved = resolve(dir.path(), "src/index.html").unwrap();
        assert_eq!(
            resolved,
            dir.path().canonicalize().unwrap().join("src/index.html")
        );
    }

    #[test]
    fn test_resolves_missing_file_inside_root() {
        let dir = root_with_file();
        let resolved = resolve(dir.path(), "./src/missing.css").unwrap();
        assert_eq!(resolved, dir.path().join("src/missing.css"));
    }

    #[test]
    fn test_rejects_parent_traversal_even_if_target_exists() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("root");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(dir.path().join("outside.txt"), "x").unwrap();

        let err = resolve(&root, "../outside.txt").unwrap_err();
        assert!(matches!(err, SandboxError::Traversal(_)));
    }

    #[test]
    fn test_rejects_inner_traversal() {
        let dir = root_with_file();
        assert!(resolve(dir.path(), "src/../../etc/passwd").is_err());
        assert!(resolve(dir.path(), "src/../index.html").is_err());
    }

    #[test]
    fn test_rejects_backslash_traversal() {
        let dir = root_with_file();
        assert!(matches!(
            resolve(dir.path(), "src\\..\\..\\secret"),
            Err(SandboxError::Traversal(_))
        ));
    }

    #[test]
    fn test_rejects_absolute_paths() {
        let dir = root_with_file();
        assert!(matches!(
            resolve(dir.path(), "/etc/passwd"),
            Err(SandboxError::AbsolutePath(_))
        ));
        assert!(matches!(
            resolve(dir.path(), "\\windows\\system32"),
            Err(SandboxError::AbsolutePath(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_rejects_symlink_escape() {
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "s3cret").unwrap();

        let dir = root_with_file();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();

        let err = resolve(dir.path(), "link/secret.txt").unwrap_err();
        assert!(matches!(err, SandboxError::Escape(_)));
    }

    #[test]
    fn test_empty_path_resolves_to_root() {
        let dir = root_with_file();
        let resolved = resolve(dir.path(), "").unwrap();
        assert_eq!(resolved, dir.path().canonicalize().unwrap());
    }
}
