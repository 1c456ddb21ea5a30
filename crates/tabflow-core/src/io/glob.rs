//! File name patterns for selecting partition files.

use std::path::{Path, PathBuf};

use regex::Regex;

use crate::error::{Error, Result};

/// A glob over the files of one directory.
///
/// Wildcards (`*`, `?`, `[...]`) are allowed in the file name only. A path
/// that names a directory matches every partition file inside it.
#[derive(Debug, Clone)]
pub struct FilePattern {
    dir: PathBuf,
    name: Regex,
    source: String,
}

impl FilePattern {
    /// Parses a pattern such as `data/train/*.tfp`.
    pub fn new(pattern: impl AsRef<str>) -> Result<Self> {
        let source = pattern.as_ref().to_owned();
        let path = Path::new(&source);

        if path.is_dir() {
            let glob = format!("*.{}", super::FILE_EXTENSION);
            return Ok(Self {
                dir: path.to_path_buf(),
                name: compile(&glob)?,
                source,
            });
        }

        let (dir, name) = match source.rfind('/') {
            Some(idx) => (&source[..idx], &source[idx + 1..]),
            None => (".", source.as_str()),
        };
        if dir.contains(['*', '?', '[']) {
            return Err(Error::configuration()
                .with_message(format!("wildcards are only supported in file names: {source}")));
        }
        if name.is_empty() {
            return Err(Error::configuration()
                .with_message(format!("pattern has no file name: {source}")));
        }

        Ok(Self {
            dir: PathBuf::from(if dir.is_empty() { "/" } else { dir }),
            name: compile(name)?,
            source,
        })
    }

    /// Returns the directory searched.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the pattern as written.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Returns true if a file name matches.
    pub fn matches(&self, file_name: &str) -> bool {
        self.name.is_match(file_name)
    }

    /// Lists matching files, sorted by path.
    pub fn expand(&self) -> Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| Error::io_at(&self.dir, e))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::io_at(&self.dir, e))?;
            let is_file = entry
                .file_type()
                .map_err(|e| Error::io_at(&entry.path(), e))?
                .is_file();
            let name = entry.file_name();
            if is_file && name.to_str().is_some_and(|n| self.matches(n)) {
                files.push(entry.path());
            }
        }

        files.sort();
        Ok(files)
    }
}

/// Translates a file-name glob into an anchored regex.
fn compile(glob: &str) -> Result<Regex> {
    let mut pattern = String::with_capacity(glob.len() * 2 + 2);
    pattern.push('^');

    let mut chars = glob.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => pattern.push_str("[^/]*"),
            '?' => pattern.push_str("[^/]"),
            '[' => {
                pattern.push('[');
                let mut closed = false;
                for (i, c) in chars.by_ref().enumerate() {
                    match c {
                        ']' => {
                            closed = true;
                            break;
                        }
                        '!' if i == 0 => pattern.push('^'),
                        '\\' | '[' | '&' | '~' => {
                            pattern.push('\\');
                            pattern.push(c);
                        }
                        c => pattern.push(c),
                    }
                }
                if !closed {
                    return Err(Error::configuration()
                        .with_message(format!("unclosed `[` in pattern {glob}")));
                }
                pattern.push(']');
            }
            c => pattern.push_str(&regex::escape(&c.to_string())),
        }
    }

    pattern.push('$');
    Regex::new(&pattern).map_err(|e| {
        Error::configuration()
            .with_message(format!("invalid pattern {glob}"))
            .with_source(e)
    })
}
