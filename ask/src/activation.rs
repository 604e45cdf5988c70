//! One-time activation: collect the API key, embed it into the config
//! artifact and splice the activation block out, atomically.
//!
//! Any failure after the key has been entered degrades to a session-only key
//! and leaves the artifact byte-identical. Only a run that ends without a
//! usable key is fatal.

use crate::artifact::ArtifactStore;
use crate::grammar::ArtifactGrammar;
use crate::resolver::{self, Placement};
use crate::scanner;
use crate::splice;
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// API key held in memory. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

#[derive(Debug, Error)]
pub enum ActivationError {
    #[error("activation block markers not found")]
    MarkersNotFound,
    #[error("activation block end marker (line {end}) does not follow its start marker (line {start})")]
    MarkersOutOfOrder { start: usize, end: usize },
    #[error("failed to read {}: {source}", path.display())]
    ReadFailed { path: PathBuf, source: io::Error },
    #[error("failed to write replacement for {}: {source}", path.display())]
    WriteFailed { path: PathBuf, source: io::Error },
    #[error("failed to replace {}: {source}", path.display())]
    ReplaceFailed { path: PathBuf, source: io::Error },
    #[error("unexpected activation failure: {0}")]
    Unexpected(String),
    #[error("could not read API key: {0}")]
    Prompt(String),
    #[error("API key is still the inert placeholder")]
    InertSecret,
}

/// Outcome of one activation attempt.
#[derive(Debug)]
pub enum Activation {
    /// The key was already set; nothing was read or written.
    AlreadyActive(Secret),
    Embedded { secret: Secret, placement: Placement },
    /// Key usable for this run only; the artifact is unchanged.
    SessionOnly { secret: Secret, failure: ActivationError },
    Fatal(ActivationError),
}

impl Activation {
    pub fn secret(&self) -> Option<&Secret> {
        match self {
            Activation::AlreadyActive(secret)
            | Activation::Embedded { secret, .. }
            | Activation::SessionOnly { secret, .. } => Some(secret),
            Activation::Fatal(_) => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Activation::AlreadyActive(_) => "already_active",
            Activation::Embedded { .. } => "embedded",
            Activation::SessionOnly { .. } => "session_only",
            Activation::Fatal(_) => "fatal",
        }
    }
}

/// Source of the real key during activation.
pub trait SecretProvider {
    fn request_secret(&self) -> Result<Secret, ActivationError>;
}

/// Check that a rewritten artifact still loads, run before it is written.
pub type SyntaxCheck = fn(&str) -> Result<(), String>;

pub struct Activator<'a, S: ArtifactStore, P: SecretProvider> {
    grammar: &'a ArtifactGrammar,
    store: &'a S,
    provider: &'a P,
    syntax_check: Option<SyntaxCheck>,
}

impl<'a, S: ArtifactStore, P: SecretProvider> Activator<'a, S, P> {
    pub fn new(grammar: &'a ArtifactGrammar, store: &'a S, provider: &'a P) -> Self {
        Self {
            grammar,
            store,
            provider,
            syntax_check: None,
        }
    }

    pub fn with_syntax_check(mut self, check: SyntaxCheck) -> Self {
        self.syntax_check = Some(check);
        self
    }

    pub fn activate(&self, current: &str) -> Activation {
        if !self.grammar.is_inert(current) {
            tracing::debug!("api key already set; skipping activation");
            return Activation::AlreadyActive(Secret::new(current));
        }

        let secret = match self.provider.request_secret() {
            Ok(secret) => secret,
            Err(err) => return Activation::Fatal(err),
        };
        if secret.expose().is_empty() || self.grammar.is_inert(secret.expose()) {
            return Activation::Fatal(ActivationError::InertSecret);
        }

        match self.embed(&secret) {
            Ok(placement) => {
                tracing::info!(?placement, "activation complete");
                Activation::Embedded { secret, placement }
            }
            Err(failure) => {
                tracing::warn!(error = %failure, "activation failed; key kept for this session");
                Activation::SessionOnly { secret, failure }
            }
        }
    }

    fn embed(&self, secret: &Secret) -> Result<Placement, ActivationError> {
        let artifact = self.store.load()?;
        tracing::debug!(lines = artifact.lines.len(), "scanning artifact");
        let loci = scanner::scan(&artifact.lines, self.grammar);
        let region = loci.region()?;

        let rendered = artifact.native_line(&self.grammar.render_assignment(secret));
        let pre_region = artifact.lines[..*region.start()].to_vec();
        let (resolved, placement) = resolver::resolve(
            pre_region,
            *region.start(),
            loci.placeholder,
            &rendered,
            self.grammar,
        );
        let region_len = region.end() - region.start() + 1;
        let candidate = artifact.with_lines(splice::splice(resolved, &artifact.lines, region));
        self.verify(
            &artifact.lines,
            &candidate.lines,
            &rendered,
            artifact.lines.len() - region_len + 1,
        )?;
        if let Some(check) = self.syntax_check {
            check(&candidate.render()).map_err(|err| {
                ActivationError::Unexpected(format!("rewritten artifact would not load: {err}"))
            })?;
        }

        tracing::debug!(lines = candidate.lines.len(), "writing activated artifact");
        self.store.replace(&candidate)?;
        Ok(placement)
    }

    fn verify(
        &self,
        original: &[String],
        lines: &[String],
        rendered: &str,
        max_len: usize,
    ) -> Result<(), ActivationError> {
        let embedded = lines.iter().filter(|line| line.as_str() == rendered).count();
        if embedded != 1 {
            return Err(ActivationError::Unexpected(format!(
                "spliced artifact holds the key line {embedded} times"
            )));
        }
        if lines.len() > max_len {
            return Err(ActivationError::Unexpected(format!(
                "spliced artifact has {} lines, expected at most {max_len}",
                lines.len()
            )));
        }
        // Later marker pairs are left alone; exactly one of each must go.
        for marker in [&self.grammar.region_start, &self.grammar.region_end] {
            let count = |lines: &[String]| {
                lines
                    .iter()
                    .filter(|line| line.trim().starts_with(marker.as_str()))
                    .count()
            };
            if count(lines) + 1 != count(original) {
                return Err(ActivationError::Unexpected(format!(
                    "marker '{marker}' not removed exactly once"
                )));
            }
        }
        Ok(())
    }
}
