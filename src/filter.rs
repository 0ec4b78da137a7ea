//! Entry selection from the command line's include and exclude lists.

use anyhow::{Context, Result};
use glob::Pattern;
use std::path::Path;

/// One positional `FILES` argument
enum Include {
    /// Contains `*`, `?` or `[`: matched against the full entry name
    Glob(Pattern),
    /// Plain name: matches the full entry name or its last component
    Exact(String),
}

/// Decides which archive entries take part in a run.
///
/// With an empty include list every entry is selected, directories
/// included. Once specific files are requested, directory entries are
/// dropped; their parents are still created on demand during extraction.
pub struct EntryFilter {
    include: Vec<Include>,
    exclude: Vec<(String, Pattern)>,
}

impl EntryFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self> {
        let include = include
            .iter()
            .map(|f| {
                if has_glob_chars(f) {
                    compile(f).map(Include::Glob)
                } else {
                    Ok(Include::Exact(f.clone()))
                }
            })
            .collect::<Result<_>>()?;
        let exclude = exclude
            .iter()
            .map(|x| Ok((x.clone(), compile(x)?)))
            .collect::<Result<_>>()?;

        Ok(Self { include, exclude })
    }

    pub fn matches(&self, name: &str, is_directory: bool) -> bool {
        if !self.include.is_empty() {
            if is_directory {
                return false;
            }
            let basename = Path::new(name)
                .file_name()
                .map(|s| s.to_string_lossy())
                .unwrap_or_default();
            let included = self.include.iter().any(|inc| match inc {
                Include::Glob(p) => p.matches(name),
                Include::Exact(f) => name == f.as_str() || basename == f.as_str(),
            });
            if !included {
                return false;
            }
        }

        !self
            .exclude
            .iter()
            .any(|(raw, pattern)| name.contains(raw.as_str()) || pattern.matches(name))
    }
}

fn has_glob_chars(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

fn compile(pattern: &str) -> Result<Pattern> {
    Pattern::new(pattern).with_context(|| format!("Invalid pattern: {}", pattern))
}
