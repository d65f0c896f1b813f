//! Which files the cache is willing to persist

use crate::config::{CacheConfig, OversizePolicy};
use crate::error::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    /// Over `maxFileSize`; handled per the oversize policy
    Oversize { size: u64, limit: u64 },
    Ineligible(String),
}

#[derive(Debug, Clone)]
pub struct EligibilityPolicy {
    enabled: bool,
    max_file_size: u64,
    extensions: HashSet<String>,
    excludes: GlobSet,
    oversize: OversizePolicy,
}

impl EligibilityPolicy {
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        let file_cache = &config.file_cache;

        let mut builder = GlobSetBuilder::new();
        for pattern in &file_cache.exclude_patterns {
            builder.add(Glob::new(pattern)?);
        }

        Ok(Self {
            enabled: config.enabled && file_cache.enabled,
            max_file_size: file_cache.max_file_size.bytes(),
            extensions: file_cache
                .extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .filter(|ext| !ext.is_empty())
                .collect(),
            excludes: builder.build()?,
            oversize: file_cache.oversize_policy,
        })
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    pub fn oversize_policy(&self) -> OversizePolicy {
        self.oversize
    }

    /// Exclude globs match against the full path or the bare file name
    pub fn is_excluded(&self, path: &Path) -> bool {
        self.excludes.is_match(path)
            || path
                .file_name()
                .map(|name| self.excludes.is_match(Path::new(name)))
                .unwrap_or(false)
    }

    pub fn extension_allowed(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.contains(&ext.to_ascii_lowercase()))
            .unwrap_or(false)
    }

    pub fn check(&self, path: &Path, size: u64) -> Eligibility {
        if !self.enabled {
            return Eligibility::Ineligible("caching disabled".to_string());
        }
        if !self.extension_allowed(path) {
            return Eligibility::Ineligible("extension not in allow-list".to_string());
        }
        if self.is_excluded(path) {
            return Eligibility::Ineligible("matches exclude pattern".to_string());
        }
        if size > self.max_file_size {
            return Eligibility::Oversize {
                size,
                limit: self.max_file_size,
            };
        }
        Eligibility::Eligible
    }
}

/// Best-effort MIME type from the file extension
pub fn mime_hint(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "txt" | "log" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "js" | "mjs" | "cjs" => "text/javascript",
        "ts" | "tsx" => "text/typescript",
        "json" => "application/json",
        "toml" => "application/toml",
        "yaml" | "yml" => "application/yaml",
        "xml" => "application/xml",
        "py" => "text/x-python",
        "rs" => "text/x-rust",
        "go" => "text/x-go",
        "java" => "text/x-java",
        "c" | "h" => "text/x-c",
        "cpp" | "hpp" | "cc" => "text/x-c++",
        "sh" => "application/x-sh",
        "sql" => "application/sql",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "pdf" => "application/pdf",
        _ => return None,
    };
    Some(mime.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ByteSize;
    use std::path::PathBuf;

    fn policy(extensions: &[&str], excludes: &[&str], max: u64) -> EligibilityPolicy {
        let mut config = CacheConfig::new(PathBuf::from("/tmp/cache"));
        config.file_cache.extensions = extensions.iter().map(|s| s.to_string()).collect();
        config.file_cache.exclude_patterns = excludes.iter().map(|s| s.to_string()).collect();
        config.file_cache.max_file_size = ByteSize(max);
        EligibilityPolicy::from_config(&config).unwrap()
    }

    #[test]
    fn test_extension_allow_list_normalized() {
        let policy = policy(&[".RS", "md"], &[], 1024);
        assert!(policy.extension_allowed(Path::new("/x/lib.rs")));
        assert!(policy.extension_allowed(Path::new("/x/README.MD")));
        assert!(!policy.extension_allowed(Path::new("/x/a.txt")));
        assert!(!policy.extension_allowed(Path::new("/x/Makefile")));
    }

    #[test]
    fn test_empty_allow_list_admits_all() {
        let policy = policy(&[], &[], 1024);
        assert!(policy.extension_allowed(Path::new("/x/anything.bin")));
    }

    #[test]
    fn test_exclude_patterns() {
        let policy = policy(&[], &["*.log", "**/node_modules/**"], 1024);
        assert!(policy.is_excluded(Path::new("/x/app.log")));
        assert!(policy.is_excluded(Path::new("/x/node_modules/pkg/index.js")));
        assert!(!policy.is_excluded(Path::new("/x/src/index.js")));
    }

    #[test]
    fn test_check_ordering() {
        let policy = policy(&["txt"], &["secret*"], 10);
        assert_eq!(policy.check(Path::new("/x/a.txt"), 5), Eligibility::Eligible);
        assert_eq!(
            policy.check(Path::new("/x/a.txt"), 50),
            Eligibility::Oversize { size: 50, limit: 10 }
        );
        assert!(matches!(
            policy.check(Path::new("/x/secret.txt"), 5),
            Eligibility::Ineligible(_)
        ));
        assert!(matches!(
            policy.check(Path::new("/x/a.bin"), 5),
            Eligibility::Ineligible(_)
        ));
    }

    #[test]
    fn test_disabled_cache() {
        let mut config = CacheConfig::new(PathBuf::from("/tmp/cache"));
        config.file_cache.enabled = false;
        let policy = EligibilityPolicy::from_config(&config).unwrap();
        assert!(matches!(
            policy.check(Path::new("/x/a.txt"), 1),
            Eligibility::Ineligible(_)
        ));
    }

    #[test]
    fn test_invalid_glob_rejected() {
        let mut config = CacheConfig::new(PathBuf::from("/tmp/cache"));
        config.file_cache.exclude_patterns = vec!["a[".to_string()];
        assert!(EligibilityPolicy::from_config(&config).is_err());
    }

    #[test]
    fn test_mime_hint() {
        assert_eq!(mime_hint(Path::new("a.RS")).as_deref(), Some("text/x-rust"));
        assert_eq!(mime_hint(Path::new("a.json")).as_deref(), Some("application/json"));
        assert_eq!(mime_hint(Path::new("a.unknown")), None);
        assert_eq!(mime_hint(Path::new("Makefile")), None);
    }
}
