use crate::grammar::ArtifactGrammar;

/// Where the rendered secret line ended up in the permanent section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Placeholder line replaced in place.
    Replaced { line: usize },
    /// Inserted right after the end-of-permanent-configuration anchor.
    AfterAnchor {
        line: usize,
        misplaced_placeholder: Option<usize>,
    },
    /// Appended to the end of the permanent section.
    Appended {
        line: usize,
        misplaced_placeholder: Option<usize>,
    },
}

impl Placement {
    /// 1-based line of the embedded key in the rewritten artifact.
    pub fn line(&self) -> usize {
        match self {
            Placement::Replaced { line }
            | Placement::AfterAnchor { line, .. }
            | Placement::Appended { line, .. } => *line,
        }
    }

    /// True when no placeholder could be replaced in place.
    pub fn placeholder_missing(&self) -> bool {
        !matches!(self, Placement::Replaced { .. })
    }

    /// 1-based line of a placeholder that sat inside or after the region.
    pub fn misplaced_placeholder(&self) -> Option<usize> {
        match self {
            Placement::Replaced { .. } => None,
            Placement::AfterAnchor {
                misplaced_placeholder,
                ..
            }
            | Placement::Appended {
                misplaced_placeholder,
                ..
            } => misplaced_placeholder.map(|idx| idx + 1),
        }
    }
}

/// Puts `rendered` into the pre-region slice, which ends right before
/// `region_start`.
pub fn resolve(
    mut pre_region: Vec<String>,
    region_start: usize,
    placeholder: Option<usize>,
    rendered: &str,
    grammar: &ArtifactGrammar,
) -> (Vec<String>, Placement) {
    let misplaced_placeholder = match placeholder {
        Some(idx) if idx < region_start && idx < pre_region.len() => {
            pre_region[idx] = rendered.to_string();
            return (pre_region, Placement::Replaced { line: idx + 1 });
        }
        Some(idx) => {
            tracing::warn!(
                line = idx + 1,
                region_start = region_start + 1,
                "placeholder lies inside or after the activation block; falling back to insertion"
            );
            Some(idx)
        }
        None => {
            tracing::warn!("placeholder assignment not found before the activation block");
            None
        }
    };

    let anchor = pre_region
        .iter()
        .position(|line| line.trim().starts_with(&grammar.anchor));
    match anchor {
        Some(idx) => {
            pre_region.insert(idx + 1, rendered.to_string());
            (
                pre_region,
                Placement::AfterAnchor {
                    line: idx + 2,
                    misplaced_placeholder,
                },
            )
        }
        None => {
            pre_region.push(rendered.to_string());
            let line = pre_region.len();
            (
                pre_region,
                Placement::Appended {
                    line,
                    misplaced_placeholder,
                },
            )
        }
    }
}
