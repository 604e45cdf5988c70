use crate::activation::ActivationError;
use crate::grammar::ArtifactGrammar;
use std::ops::RangeInclusive;

/// Loci found by a single forward pass over the artifact lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Loci {
    pub region_start: Option<usize>,
    pub region_end: Option<usize>,
    /// First end marker seen before any start marker.
    pub stray_end: Option<usize>,
    pub placeholder: Option<usize>,
}

impl Loci {
    /// The removable region, both marker lines included.
    pub fn region(&self) -> Result<RangeInclusive<usize>, ActivationError> {
        match (self.region_start, self.region_end, self.stray_end) {
            (Some(start), Some(end), _) if end > start => Ok(start..=end),
            (Some(start), Some(end), _) | (Some(start), None, Some(end)) => {
                Err(ActivationError::MarkersOutOfOrder {
                    start: start + 1,
                    end: end + 1,
                })
            }
            _ => Err(ActivationError::MarkersNotFound),
        }
    }
}

pub fn scan(lines: &[String], grammar: &ArtifactGrammar) -> Loci {
    let placeholder_site = grammar.placeholder_site();
    let mut loci = Loci::default();
    for (idx, line) in lines.iter().enumerate() {
        let trimmed = line.trim();
        if loci.region_start.is_none() && trimmed.starts_with(&grammar.region_start) {
            loci.region_start = Some(idx);
            tracing::debug!(line = idx + 1, "found activation block start marker");
        } else if trimmed.starts_with(&grammar.region_end) {
            if loci.region_start.is_some() {
                if loci.region_end.is_none() {
                    loci.region_end = Some(idx);
                    tracing::debug!(line = idx + 1, "found activation block end marker");
                }
            } else if loci.stray_end.is_none() {
                loci.stray_end = Some(idx);
                tracing::debug!(line = idx + 1, "ignoring end marker before start marker");
            }
        } else if loci.placeholder.is_none() && trimmed.starts_with(&placeholder_site) {
            loci.placeholder = Some(idx);
            tracing::debug!(line = idx + 1, "found placeholder assignment");
        }
    }
    loci
}
