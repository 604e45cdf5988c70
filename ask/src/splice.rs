use std::ops::RangeInclusive;

/// Resolved permanent section followed by everything after the region.
/// The region itself, marker lines included, is dropped.
pub fn splice(
    resolved_pre_region: Vec<String>,
    lines: &[String],
    region: RangeInclusive<usize>,
) -> Vec<String> {
    let tail_start = (*region.end() + 1).min(lines.len());
    let mut out = resolved_pre_region;
    out.extend_from_slice(&lines[tail_start..]);
    out
}
