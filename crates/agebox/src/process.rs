//! Secret id processing
//!
//! Turns a raw id typed by the user (`./app/../db/pass.agebox`) into the
//! canonical id used everywhere else (`db/pass`), or excludes it when an
//! ignore pattern matches.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use crate::cancel::CancellationToken;

/// Resolves raw ids into canonical ones.
///
/// `Ok(None)` means the id was deliberately excluded and is not an error.
/// An `Err` means the id could not be resolved and must not be treated as
/// excluded.
#[cfg_attr(test, mockall::automock)]
pub trait IdProcessor: Send + Sync {
    fn process_id(&self, ctx: &CancellationToken, raw_id: &str) -> Result<Option<String>>;
}

/// Normalizes ids into clean paths relative to the box root
pub struct PathSanitizer {
    root: PathBuf,
}

impl PathSanitizer {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }
}

impl IdProcessor for PathSanitizer {
    fn process_id(&self, _ctx: &CancellationToken, raw_id: &str) -> Result<Option<String>> {
        let raw = raw_id.trim();
        if raw.is_empty() {
            bail!("secret id cannot be empty");
        }

        let path = Path::new(raw);
        let relative = if path.is_absolute() {
            path.strip_prefix(&self.root)
                .with_context(|| format!("{} is outside the box root {}", raw, self.root.display()))?
        } else {
            path
        };

        let mut parts: Vec<String> = vec![];
        for component in relative.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_string_lossy().to_string()),
                Component::CurDir => {}
                Component::ParentDir => {
                    if parts.pop().is_none() {
                        bail!("{} escapes the box root", raw);
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    bail!("{} is not a relative path", raw);
                }
            }
        }

        if parts.is_empty() {
            bail!("{} does not name a file", raw);
        }

        Ok(Some(parts.join("/")))
    }
}

/// Strips the encrypted file extension so both name forms of a secret
/// resolve to the same id
pub struct TrimExtension {
    extension: String,
}

impl TrimExtension {
    pub fn new(extension: &str) -> Self {
        Self {
            extension: extension.to_string(),
        }
    }
}

impl IdProcessor for TrimExtension {
    fn process_id(&self, _ctx: &CancellationToken, raw_id: &str) -> Result<Option<String>> {
        match raw_id.strip_suffix(&self.extension) {
            Some("") => bail!("{} has no name besides its extension", raw_id),
            Some(trimmed) => Ok(Some(trimmed.to_string())),
            None => Ok(Some(raw_id.to_string())),
        }
    }
}

/// Excludes ids matching glob patterns
#[derive(Debug, Default)]
pub struct IgnoreMatcher {
    patterns: Vec<glob::Pattern>,
}

impl IgnoreMatcher {
    /// Build from raw patterns
    pub fn from_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut compiled = vec![];
        for pattern in patterns {
            let pattern = pattern.as_ref().trim().trim_end_matches('/');
            if pattern.is_empty() || pattern.starts_with('#') {
                continue;
            }
            compiled.push(
                glob::Pattern::new(pattern)
                    .with_context(|| format!("Invalid ignore pattern: {}", pattern))?,
            );
        }
        Ok(Self { patterns: compiled })
    }

    /// Load patterns from an ignore file, one per line. A missing file
    /// ignores nothing.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read ignore file {:?}", path))?;
        let lines: Vec<&str> = content.lines().collect();
        Self::from_patterns(&lines)
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Whether an id (or any directory containing it) matches
    pub fn is_ignored(&self, id: &str) -> bool {
        let filename = id.rsplit('/').next().unwrap_or(id);
        self.patterns.iter().any(|p| {
            p.matches(id)
                || p.matches(filename)
                || ancestors(id).any(|dir| p.matches(dir))
        })
    }
}

/// `a/b/c` -> `a/b`, `a`
fn ancestors(id: &str) -> impl Iterator<Item = &str> {
    id.match_indices('/').map(move |(i, _)| &id[..i])
}

impl IdProcessor for IgnoreMatcher {
    fn process_id(&self, _ctx: &CancellationToken, raw_id: &str) -> Result<Option<String>> {
        if self.is_ignored(raw_id) {
            debug!(id = raw_id, "secret ignored");
            return Ok(None);
        }
        Ok(Some(raw_id.to_string()))
    }
}

/// Applies processors in order, stopping at the first error or exclusion
#[derive(Default)]
pub struct ProcessorChain {
    processors: Vec<Box<dyn IdProcessor>>,
}

impl ProcessorChain {
    pub fn new(processors: Vec<Box<dyn IdProcessor>>) -> Self {
        Self { processors }
    }

    /// Standard chain for a box: sanitize, trim the extension, ignore
    pub fn for_box(root: &Path, extension: &str, ignore: IgnoreMatcher) -> Self {
        Self::new(vec![
            Box::new(PathSanitizer::new(root)),
            Box::new(TrimExtension::new(extension)),
            Box::new(ignore),
        ])
    }
}

impl IdProcessor for ProcessorChain {
    fn process_id(&self, ctx: &CancellationToken, raw_id: &str) -> Result<Option<String>> {
        let mut id = raw_id.to_string();
        for processor in &self.processors {
            match processor.process_id(ctx, &id)? {
                Some(next) => id = next,
                None => return Ok(None),
            }
        }
        Ok(Some(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn process(p: &dyn IdProcessor, id: &str) -> Result<Option<String>> {
        p.process_id(&CancellationToken::new(), id)
    }

    #[test]
    fn test_sanitize_paths() {
        let p = PathSanitizer::new(Path::new("/repo"));

        assert_eq!(process(&p, "db/pass").unwrap().as_deref(), Some("db/pass"));
        assert_eq!(process(&p, "./db//pass").unwrap().as_deref(), Some("db/pass"));
        assert_eq!(process(&p, "app/../db/pass").unwrap().as_deref(), Some("db/pass"));
        assert_eq!(process(&p, " /repo/db/pass ").unwrap().as_deref(), Some("db/pass"));
    }

    #[test]
    fn test_sanitize_rejects_invalid() {
        let p = PathSanitizer::new(Path::new("/repo"));

        assert!(process(&p, "").is_err());
        assert!(process(&p, "   ").is_err());
        assert!(process(&p, "../escape").is_err());
        assert!(process(&p, "/etc/passwd").is_err());
        assert!(process(&p, "db/..").is_err());
    }

    #[test]
    fn test_trim_extension() {
        let p = TrimExtension::new(".agebox");

        assert_eq!(process(&p, "db/pass.agebox").unwrap().as_deref(), Some("db/pass"));
        assert_eq!(process(&p, "db/pass").unwrap().as_deref(), Some("db/pass"));
        assert!(process(&p, ".agebox").is_err());
    }

    #[test]
    fn test_ignore_patterns() {
        let ignore = IgnoreMatcher::from_patterns(&["# comment", "", "*.tmp", "vendor/", "keys/*"]).unwrap();

        assert!(ignore.is_ignored("scratch.tmp"));
        assert!(ignore.is_ignored("app/scratch.tmp"));
        assert!(ignore.is_ignored("vendor/lib/secret"));
        assert!(ignore.is_ignored("keys/alice.pub"));
        assert!(!ignore.is_ignored("db/pass"));
        assert!(!ignore.is_ignored("vendored"));

        assert_eq!(process(&ignore, "scratch.tmp").unwrap(), None);
        assert_eq!(process(&ignore, "db/pass").unwrap().as_deref(), Some("db/pass"));
    }

    #[test]
    fn test_invalid_ignore_pattern() {
        assert!(IgnoreMatcher::from_patterns(&["[unclosed"]).is_err());
    }

    #[test]
    fn test_load_ignore_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".ageboxignore");

        assert!(IgnoreMatcher::load(&path).unwrap().is_empty());

        fs::write(&path, "# local overrides\n*.local\n").unwrap();
        let ignore = IgnoreMatcher::load(&path).unwrap();
        assert!(ignore.is_ignored("config/app.local"));
        assert!(!ignore.is_ignored("config/app.prod"));
    }

    #[test]
    fn test_chain() {
        let ignore = IgnoreMatcher::from_patterns(&["ignored"]).unwrap();
        let chain = ProcessorChain::for_box(Path::new("/repo"), ".agebox", ignore);

        assert_eq!(process(&chain, "./secret1.agebox").unwrap().as_deref(), Some("secret1"));
        assert_eq!(process(&chain, "ignored.agebox").unwrap(), None);
        assert!(process(&chain, "../outside").is_err());
    }

    #[test]
    fn test_chain_stops_at_exclusion() {
        let mut first = MockIdProcessor::new();
        first.expect_process_id().times(1).returning(|_, _| Ok(None));
        let mut second = MockIdProcessor::new();
        second.expect_process_id().never();

        let chain = ProcessorChain::new(vec![Box::new(first), Box::new(second)]);
        assert_eq!(process(&chain, "x").unwrap(), None);
    }
}
