//! Domain allowlist parsing
//!
//! The allowlist is line oriented: blank lines and `#` comments are ignored,
//! every other line is one domain pattern. A leading `.` marks subdomain
//! intent for the forward proxy; it carries no meaning at the IP layer, so
//! the bare hostname is what gets resolved.

use crate::error::{CoreError, Result};
use std::fmt;
use std::fs;
use std::path::Path;

/// A single allowlist line after normalization
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AllowlistEntry {
    host: String,
    subdomains: bool,
}

impl AllowlistEntry {
    /// Parse one line; comments and blank lines yield `None`
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        let (host, subdomains) = match line.strip_prefix('.') {
            Some(rest) => (rest.trim(), true),
            None => (line, false),
        };

        if host.is_empty() {
            return None;
        }

        Some(Self {
            host: host.to_ascii_lowercase(),
            subdomains,
        })
    }

    /// Bare hostname used for resolution
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Whether the line was written as `.example.com`
    pub fn includes_subdomains(&self) -> bool {
        self.subdomains
    }
}

impl fmt::Display for AllowlistEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.subdomains {
            write!(f, ".{}", self.host)
        } else {
            write!(f, "{}", self.host)
        }
    }
}

/// Parsed allowlist, in file order with duplicates removed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Allowlist {
    entries: Vec<AllowlistEntry>,
}

impl Allowlist {
    pub fn parse(contents: &str) -> Self {
        let mut entries: Vec<AllowlistEntry> = Vec::new();
        for entry in contents.lines().filter_map(AllowlistEntry::parse) {
            if !entries.contains(&entry) {
                entries.push(entry);
            }
        }
        Self { entries }
    }

    /// Load from a file; a missing file is reported as `AllowlistNotFound`
    /// so callers can decide whether that is fatal
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                CoreError::AllowlistNotFound(path.to_path_buf())
            } else {
                CoreError::AllowlistRead {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        Ok(Self::parse(&contents))
    }

    pub fn entries(&self) -> &[AllowlistEntry] {
        &self.entries
    }

    /// Distinct hostnames to resolve (`.example.com` and `example.com` collapse)
    pub fn hosts(&self) -> Vec<&str> {
        let mut hosts: Vec<&str> = Vec::new();
        for entry in &self.entries {
            if !hosts.contains(&entry.host()) {
                hosts.push(entry.host());
            }
        }
        hosts
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_skips_comments_and_blanks() {
        let list = Allowlist::parse("# header\n\n  \napi.anthropic.com\n  # indented comment\n");
        assert_eq!(list.len(), 1);
        assert_eq!(list.entries()[0].host(), "api.anthropic.com");
    }

    #[test]
    fn test_leading_dot_is_stripped() {
        let dotted = AllowlistEntry::parse(".example.com").unwrap();
        let bare = AllowlistEntry::parse("example.com").unwrap();

        assert_eq!(dotted.host(), bare.host());
        assert!(dotted.includes_subdomains());
        assert!(!bare.includes_subdomains());
        assert_eq!(dotted.to_string(), ".example.com");
    }

    #[test]
    fn test_whitespace_and_case_normalized() {
        let entry = AllowlistEntry::parse("   .Registry.NPMJS.org\t").unwrap();
        assert_eq!(entry.host(), "registry.npmjs.org");
    }

    #[test]
    fn test_lone_dot_is_not_an_entry() {
        assert!(AllowlistEntry::parse(".").is_none());
        assert!(AllowlistEntry::parse(" . ").is_none());
    }

    #[test]
    fn test_hosts_collapse_wildcard_and_exact() {
        let list = Allowlist::parse(".example.com\nexample.com\ngithub.com\n");
        assert_eq!(list.len(), 3);
        assert_eq!(list.hosts(), vec!["example.com", "github.com"]);
    }

    #[test]
    fn test_duplicate_lines_removed() {
        let list = Allowlist::parse("pypi.org\npypi.org\n");
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "# allowed\n.github.com\ncrates.io").unwrap();

        let list = Allowlist::load(file.path()).unwrap();
        assert_eq!(list.hosts(), vec!["github.com", "crates.io"]);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = Allowlist::load(dir.path().join("nope.txt"));
        assert!(matches!(result, Err(CoreError::AllowlistNotFound(_))));
    }
}
