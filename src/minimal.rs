//! Minimal patch rewrite
//!
//! Fallback for predictions that do not apply as written. Each hunk is cut
//! down to its changed lines plus at most one trailing context line, trailing
//! whitespace is stripped, and the hunk headers are recomputed from what is
//! left. Stale line numbers and hallucinated context are the usual reasons a
//! predicted patch fails, and both mostly disappear in the rewrite.

use crate::diff::{parse_patch, render_patch, DiffHunk, DiffLine, FilePatch};

/// Rewrites a patch that failed to apply into one more likely to apply.
///
/// Implementations are pure: same input, same output, no testbed access.
pub trait PatchReducer {
    fn reduce(&self, raw: &str) -> String;
}

/// The production reducer, backed by [`extract_minimal_patch`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MinimalPatch;

impl PatchReducer for MinimalPatch {
    fn reduce(&self, raw: &str) -> String {
        extract_minimal_patch(raw)
    }
}

impl<F> PatchReducer for F
where
    F: Fn(&str) -> String,
{
    fn reduce(&self, raw: &str) -> String {
        self(raw)
    }
}

/// Rewrite `raw` into its minimal form. Input that contains no hunk with
/// changes comes back unchanged.
pub fn extract_minimal_patch(raw: &str) -> String {
    let files = parse_patch(raw.trim_start_matches('\n'));

    let minimized = files
        .into_iter()
        .filter_map(|file| {
            let mut delta = 0isize;
            let hunks = file
                .hunks
                .iter()
                .filter_map(|hunk| minimize_hunk(hunk, &mut delta))
                .collect::<Vec<_>>();
            if hunks.is_empty() {
                None
            } else {
                Some(FilePatch { hunks, ..file })
            }
        })
        .collect::<Vec<_>>();

    if minimized.is_empty() {
        return raw.to_string();
    }
    render_patch(&minimized)
}

/// `delta` is the running (new - old) line offset of earlier hunks in the file.
fn minimize_hunk(hunk: &DiffHunk, delta: &mut isize) -> Option<DiffHunk> {
    if !hunk.has_changes() {
        return None;
    }
    let first = hunk.lines.iter().position(DiffLine::is_change)?;
    let last = hunk.lines.iter().rposition(DiffLine::is_change)?;

    let mut end = skip_markers(&hunk.lines, last + 1);
    if matches!(hunk.lines.get(end), Some(DiffLine::Context(_))) {
        end = skip_markers(&hunk.lines, end + 1);
    }

    let dropped = hunk.lines[..first]
        .iter()
        .filter(|l| matches!(l, DiffLine::Context(_)))
        .count();

    let lines = hunk.lines[first..end]
        .iter()
        .map(|line| match line {
            DiffLine::Context(s) => DiffLine::Context(s.trim_end().to_string()),
            DiffLine::Add(s) => DiffLine::Add(s.trim_end().to_string()),
            DiffLine::Remove(s) => DiffLine::Remove(s.trim_end().to_string()),
            DiffLine::NoNewline => DiffLine::NoNewline,
        })
        .collect::<Vec<_>>();

    let (mut context, mut added, mut removed) = (0usize, 0usize, 0usize);
    for line in &lines {
        match line {
            DiffLine::Context(_) => context += 1,
            DiffLine::Add(_) => added += 1,
            DiffLine::Remove(_) => removed += 1,
            DiffLine::NoNewline => {}
        }
    }
    let old_count = context + removed;
    let new_count = context + added;

    // A zero-length old range names the line *after which* the hunk lands.
    let base = if hunk.old_count == 0 {
        hunk.old_start + 1
    } else {
        hunk.old_start
    };
    let pos = base + dropped;
    let old_start = if old_count == 0 { pos.saturating_sub(1) } else { pos };
    let new_pos = pos as isize + *delta;
    let new_start = if new_count == 0 { new_pos - 1 } else { new_pos };
    *delta += new_count as isize - old_count as isize;

    Some(DiffHunk {
        old_start,
        old_count,
        new_start: new_start.max(0) as usize,
        new_count,
        section: hunk.section.clone(),
        lines,
    })
}

fn skip_markers(lines: &[DiffLine], mut idx: usize) -> usize {
    while matches!(lines.get(idx), Some(DiffLine::NoNewline)) {
        idx += 1;
    }
    idx
}
