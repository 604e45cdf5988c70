use crate::activation::ActivationError;
use crate::writer;
use std::fs;
use std::path::{Path, PathBuf};

/// Line-oriented view of an artifact file.
///
/// Lines are split on `\n` only. A line read from a CRLF file keeps its
/// trailing `\r`, so mixed line endings are written back verbatim; matching
/// always goes through `trim`. Generated lines follow the ending of the first
/// line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub lines: Vec<String>,
    crlf: bool,
    trailing_newline: bool,
}

impl Artifact {
    pub fn parse(content: &str) -> Self {
        let trailing_newline = content.ends_with('\n');
        let body = content.strip_suffix('\n').unwrap_or(content);
        let lines: Vec<String> = if content.is_empty() {
            Vec::new()
        } else {
            body.split('\n').map(|s| s.to_string()).collect()
        };
        let crlf = lines.first().map_or(false, |line| line.ends_with('\r'));
        Self {
            lines,
            crlf,
            trailing_newline,
        }
    }

    /// Same line-ending conventions, different lines.
    pub fn with_lines(&self, lines: Vec<String>) -> Self {
        Self {
            lines,
            crlf: self.crlf,
            trailing_newline: self.trailing_newline,
        }
    }

    /// `line` with the ending generated lines should carry in this artifact.
    pub fn native_line(&self, line: &str) -> String {
        if self.crlf {
            format!("{line}\r")
        } else {
            line.to_string()
        }
    }

    pub fn render(&self) -> String {
        let mut out = self.lines.join("\n");
        if self.trailing_newline && !self.lines.is_empty() {
            out.push('\n');
        }
        out
    }
}

/// Whole-sequence access to the persistent artifact.
pub trait ArtifactStore {
    fn load(&self) -> Result<Artifact, ActivationError>;
    fn replace(&self, artifact: &Artifact) -> Result<(), ActivationError>;
}

pub struct FileArtifact {
    path: PathBuf,
}

impl FileArtifact {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // Replacing a symlink by rename would sever it, so writes go to the
    // file it points at.
    fn write_target(&self) -> PathBuf {
        fs::canonicalize(&self.path).unwrap_or_else(|_| self.path.clone())
    }
}

impl ArtifactStore for FileArtifact {
    fn load(&self) -> Result<Artifact, ActivationError> {
        let content = fs::read_to_string(&self.path).map_err(|source| ActivationError::ReadFailed {
            path: self.path.clone(),
            source,
        })?;
        Ok(Artifact::parse(&content))
    }

    fn replace(&self, artifact: &Artifact) -> Result<(), ActivationError> {
        writer::write_atomic(&self.write_target(), &artifact.render())
    }
}
