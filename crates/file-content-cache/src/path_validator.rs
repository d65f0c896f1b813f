//! Allow-list check on canonical paths

use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct PathValidator {
    roots: Vec<PathBuf>,
    enabled: bool,
}

impl PathValidator {
    /// Roots that do not resolve are dropped
    pub fn new(roots: &[PathBuf], enabled: bool) -> Self {
        let roots = roots
            .iter()
            .filter_map(|root| match std::fs::canonicalize(root) {
                Ok(canonical) => Some(canonical),
                Err(e) => {
                    warn!(root = %root.display(), error = %e, "Dropping unresolvable allowed directory");
                    None
                }
            })
            .collect();
        Self { roots, enabled }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Canonical form of `path` if it is admitted
    pub fn resolve(&self, path: &Path) -> Option<PathBuf> {
        let canonical = canonicalize_lenient(path)?;
        if !self.enabled || self.roots.iter().any(|root| canonical.starts_with(root)) {
            Some(canonical)
        } else {
            None
        }
    }

    pub fn is_allowed(&self, path: &Path) -> bool {
        self.resolve(path).is_some()
    }
}

/// Canonicalize, tolerating a final component that does not exist yet
fn canonicalize_lenient(path: &Path) -> Option<PathBuf> {
    if let Ok(canonical) = std::fs::canonicalize(path) {
        return Some(canonical);
    }
    let name = path.file_name()?;
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::canonicalize(parent).ok().map(|p| p.join(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_path_inside_root_allowed() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "x").unwrap();

        let validator = PathValidator::new(&[dir.path().to_path_buf()], true);
        assert!(validator.is_allowed(&file));
        assert_eq!(
            validator.resolve(&file).unwrap(),
            std::fs::canonicalize(&file).unwrap()
        );
    }

    #[test]
    fn test_path_outside_root_rejected() {
        let allowed = tempdir().unwrap();
        let other = tempdir().unwrap();
        let file = other.path().join("secret.txt");
        std::fs::write(&file, "x").unwrap();

        let validator = PathValidator::new(&[allowed.path().to_path_buf()], true);
        assert!(!validator.is_allowed(&file));
    }

    #[test]
    fn test_traversal_is_resolved_before_check() {
        let root = tempdir().unwrap();
        let inner = root.path().join("inner");
        std::fs::create_dir(&inner).unwrap();
        let outside = tempdir().unwrap();
        std::fs::write(outside.path().join("x.txt"), "x").unwrap();

        let validator = PathValidator::new(&[inner.clone()], true);
        let sneaky = inner.join("..").join("..").join(outside.path().file_name().unwrap());
        assert!(!validator.is_allowed(&sneaky.join("x.txt")));
    }

    #[test]
    fn test_nonexistent_file_under_root() {
        let dir = tempdir().unwrap();
        let validator = PathValidator::new(&[dir.path().to_path_buf()], true);
        let resolved = validator.resolve(&dir.path().join("new.txt")).unwrap();
        assert_eq!(
            resolved,
            std::fs::canonicalize(dir.path()).unwrap().join("new.txt")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_rejected() {
        let allowed = tempdir().unwrap();
        let outside = tempdir().unwrap();
        let target = outside.path().join("t.txt");
        std::fs::write(&target, "x").unwrap();
        let link = allowed.path().join("link.txt");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let validator = PathValidator::new(&[allowed.path().to_path_buf()], true);
        assert!(!validator.is_allowed(&link));
    }

    #[test]
    fn test_disabled_validation_admits_everything() {
        let allowed = tempdir().unwrap();
        let other = tempdir().unwrap();
        let file = other.path().join("a.txt");
        std::fs::write(&file, "x").unwrap();

        let validator = PathValidator::new(&[allowed.path().to_path_buf()], false);
        assert!(validator.is_allowed(&file));
    }

    #[test]
    fn test_unresolvable_root_dropped() {
        let validator = PathValidator::new(&[PathBuf::from("/definitely/not/here/xyz")], true);
        assert!(validator.roots().is_empty());
        assert!(!validator.is_allowed(Path::new("/tmp")));
    }
}
