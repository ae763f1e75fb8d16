//! Unified diff parsing and rendering
//!
//! Parses multi-file patches in the shape `git diff` and most model outputs
//! produce. The parser is lenient about hunk line counts: a hunk runs until
//! the next hunk header, the next file header, or the first line that is not
//! hunk content. Predicted patches often carry wrong counts, and the minimal
//! patch rewrite recomputes them anyway. The one place the declared counts
//! matter is a bare empty line: it is read as blank context while the hunk
//! still expects lines or more hunk lines follow it. Blank separators after
//! a hunk are ignored.

use regex::Regex;
use std::fmt::Write as _;
use std::sync::OnceLock;

/// A single line in a diff hunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffLine {
    Context(String),
    Add(String),
    Remove(String),
    /// `\ No newline at end of file`, attached to the line before it.
    NoNewline,
}

impl DiffLine {
    pub fn is_change(&self) -> bool {
        matches!(self, DiffLine::Add(_) | DiffLine::Remove(_))
    }

    fn render(&self, out: &mut String) {
        match self {
            DiffLine::Context(s) => {
                out.push(' ');
                out.push_str(s);
            }
            DiffLine::Add(s) => {
                out.push('+');
                out.push_str(s);
            }
            DiffLine::Remove(s) => {
                out.push('-');
                out.push_str(s);
            }
            DiffLine::NoNewline => out.push_str("\\ No newline at end of file"),
        }
        out.push('\n');
    }
}

/// A hunk in a unified diff
#[derive(Debug, Clone, PartialEq)]
pub struct DiffHunk {
    pub old_start: usize,
    pub old_count: usize,
    pub new_start: usize,
    pub new_count: usize,
    /// Text after the closing `@@`, usually the enclosing function signature.
    pub section: String,
    pub lines: Vec<DiffLine>,
}

impl DiffHunk {
    pub fn has_changes(&self) -> bool {
        self.lines.iter().any(DiffLine::is_change)
    }

    fn render(&self, out: &mut String) {
        let _ = writeln!(
            out,
            "@@ -{},{} +{},{} @@{}",
            self.old_start, self.old_count, self.new_start, self.new_count, self.section
        );
        for line in &self.lines {
            line.render(out);
        }
    }
}

/// The changes to one file
#[derive(Debug, Clone, PartialEq)]
pub struct FilePatch {
    /// Header lines verbatim, from `diff --git` (when present) through `+++`.
    pub header: Vec<String>,
    pub old_path: String,
    pub new_path: String,
    pub hunks: Vec<DiffHunk>,
}

impl FilePatch {
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.header {
            out.push_str(line);
            out.push('\n');
        }
        for hunk in &self.hunks {
            hunk.render(&mut out);
        }
        out
    }
}

/// Render a set of file patches back into one patch text.
pub fn render_patch(files: &[FilePatch]) -> String {
    files.iter().map(FilePatch::render).collect()
}

fn hunk_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@(.*)$")
            .unwrap_or_else(|_| Regex::new("$^").unwrap())
    })
}

fn parse_hunk_header(line: &str) -> Option<DiffHunk> {
    let caps = hunk_header_re().captures(line)?;
    let num = |i: usize, default: usize| -> Option<usize> {
        match caps.get(i) {
            Some(m) => m.as_str().parse().ok(),
            None => Some(default),
        }
    };
    Some(DiffHunk {
        old_start: num(1, 0)?,
        old_count: num(2, 1)?,
        new_start: num(3, 0)?,
        new_count: num(4, 1)?,
        section: caps.get(5).map(|m| m.as_str().to_string()).unwrap_or_default(),
        lines: Vec::new(),
    })
}

fn strip_path(raw: &str, prefix: &str) -> String {
    let path = raw.split('\t').next().unwrap_or(raw).trim_end();
    path.strip_prefix(prefix).unwrap_or(path).to_string()
}

fn is_file_header_start(lines: &[&str], i: usize) -> bool {
    lines[i].starts_with("--- ")
        && lines
            .get(i + 1)
            .map(|next| next.starts_with("+++ "))
            .unwrap_or(false)
}

/// Whether the blank lines starting at `i` are followed by more lines of the
/// same hunk.
fn blank_run_continues_hunk(lines: &[&str], i: usize) -> bool {
    let mut j = i;
    while j < lines.len() && lines[j].is_empty() {
        j += 1;
    }
    match lines.get(j) {
        Some(next) => {
            !is_file_header_start(lines, j)
                && (next.starts_with('+')
                    || next.starts_with('-')
                    || next.starts_with(' ')
                    || next.starts_with('\\'))
        }
        None => false,
    }
}

/// Parse every file section in `text`. Text outside file sections is ignored.
pub fn parse_patch(text: &str) -> Vec<FilePatch> {
    let lines: Vec<&str> = text.lines().collect();
    let mut files = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let mut header = Vec::new();

        if lines[i].starts_with("diff ") {
            header.push(lines[i].to_string());
            i += 1;
            while i < lines.len() && !is_file_header_start(&lines, i) {
                if lines[i].starts_with("diff ") || lines[i].starts_with("@@ ") {
                    break;
                }
                header.push(lines[i].to_string());
                i += 1;
            }
            if i >= lines.len() || !is_file_header_start(&lines, i) {
                // Header-only section (binary, mode change, pure rename).
                continue;
            }
        } else if !is_file_header_start(&lines, i) {
            i += 1;
            continue;
        }

        let old_path = strip_path(&lines[i][4..], "a/");
        let new_path = strip_path(&lines[i + 1][4..], "b/");
        header.push(lines[i].to_string());
        header.push(lines[i + 1].to_string());
        i += 2;

        let mut hunks = Vec::new();
        while i < lines.len() {
            let Some(mut hunk) = parse_hunk_header(lines[i]) else {
                break;
            };
            i += 1;
            let (mut old_seen, mut new_seen) = (0usize, 0usize);
            while i < lines.len() {
                let line = lines[i];
                if line.starts_with("@@ ") || line.starts_with("diff ") {
                    break;
                }
                if is_file_header_start(&lines, i) {
                    break;
                }
                let parsed = if let Some(rest) = line.strip_prefix('+') {
                    DiffLine::Add(rest.to_string())
                } else if let Some(rest) = line.strip_prefix('-') {
                    DiffLine::Remove(rest.to_string())
                } else if let Some(rest) = line.strip_prefix(' ') {
                    DiffLine::Context(rest.to_string())
                } else if line.is_empty() {
                    let expected = old_seen < hunk.old_count || new_seen < hunk.new_count;
                    if !expected && !blank_run_continues_hunk(&lines, i) {
                        break;
                    }
                    DiffLine::Context(String::new())
                } else if line.starts_with('\\') {
                    DiffLine::NoNewline
                } else {
                    break;
                };
                match parsed {
                    DiffLine::Context(_) => {
                        old_seen += 1;
                        new_seen += 1;
                    }
                    DiffLine::Remove(_) => old_seen += 1,
                    DiffLine::Add(_) => new_seen += 1,
                    DiffLine::NoNewline => {}
                }
                hunk.lines.push(parsed);
                i += 1;
            }
            hunks.push(hunk);
            while i < lines.len() && lines[i].is_empty() {
                i += 1;
            }
        }

        files.push(FilePatch {
            header,
            old_path,
            new_path,
            hunks,
        });
    }

    files
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_FILES: &str = "diff --git a/src/lib.py b/src/lib.py
index 83db48f..bf269f4 100644
--- a/src/lib.py
+++ b/src/lib.py
@@ -1,4 +1,5 @@ def hello():
 def hello():
-    print(\"old\")
+    print(\"new\")
+    print(\"extra\")
     return True
@@ -10,3 +11,3 @@
 x = 1
-y = 2
+y = 3
diff --git a/README.md b/README.md
--- a/README.md
+++ b/README.md
@@ -1 +1 @@
-hello
+hello world
\\ No newline at end of file
";

    #[test]
    fn test_parse_multi_file_patch() {
        let files = parse_patch(TWO_FILES);
        assert_eq!(files.len(), 2);

        let lib = &files[0];
        assert_eq!(lib.old_path, "src/lib.py");
        assert_eq!(lib.new_path, "src/lib.py");
        assert_eq!(lib.header.len(), 4);
        assert_eq!(lib.hunks.len(), 2);
        assert_eq!(lib.hunks[0].section, " def hello():");
        assert_eq!(
            lib.hunks[0].lines[1],
            DiffLine::Remove("    print(\"old\")".to_string())
        );
        assert!(lib.hunks.iter().all(DiffHunk::has_changes));

        let readme = &files[1];
        assert_eq!(readme.hunks[0].old_count, 1);
        assert_eq!(readme.hunks[0].new_count, 1);
        assert_eq!(readme.hunks[0].lines.last(), Some(&DiffLine::NoNewline));
    }

    #[test]
    fn test_render_reproduces_well_formed_input() {
        let files = parse_patch(TWO_FILES);
        let rendered = render_patch(&files);
        // Single-number ranges are rendered in their explicit `n,1` form.
        let expected = TWO_FILES.replace("@@ -1 +1 @@", "@@ -1,1 +1,1 @@");
        assert_eq!(rendered, expected);
    }

    #[test]
    fn test_leading_prose_and_trailer_are_ignored() {
        let text = "Here is my fix:\n\n--- a/f.txt\n+++ b/f.txt\n@@ -1,2 +1,2 @@\n a\n-b\n+c\nHope this helps!\n";
        let files = parse_patch(text);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].hunks[0].lines.len(), 3);
        assert_eq!(files[0].header, vec!["--- a/f.txt", "+++ b/f.txt"]);
    }

    #[test]
    fn test_header_only_section_is_skipped() {
        let text = "diff --git a/img.png b/img.png\nBinary files differ\ndiff --git a/f b/f\n--- a/f\n+++ b/f\n@@ -1 +1 @@\n-a\n+b\n";
        let files = parse_patch(text);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].old_path, "f");
    }

    #[test]
    fn test_trailing_blank_lines_are_not_context() {
        let text = "--- a/f\n+++ b/f\n@@ -1,2 +1,2 @@\n a\n-b\n+B\n\n\n--- a/g\n+++ b/g\n@@ -1 +1 @@\n-x\n+y\n\n";
        let files = parse_patch(text);
        assert_eq!(files.len(), 2);
        assert_eq!(
            files[0].hunks[0].lines,
            vec![
                DiffLine::Context("a".to_string()),
                DiffLine::Remove("b".to_string()),
                DiffLine::Add("B".to_string()),
            ]
        );
        assert_eq!(files[1].hunks[0].lines.len(), 2);
    }

    #[test]
    fn test_blank_lines_inside_hunks_are_context() {
        // Declared counts cover the first blank; the second is followed by more hunk lines.
        let text = "--- a/f\n+++ b/f\n@@ -1,3 +1,3 @@\n a\n\n-b\n+B\n\n c\n\n@@ -20,1 +20,1 @@\n-y\n+Y\n";
        let files = parse_patch(text);
        let hunks = &files[0].hunks;
        assert_eq!(hunks.len(), 2);
        assert_eq!(hunks[0].lines.len(), 6);
        assert_eq!(hunks[0].lines[4], DiffLine::Context(String::new()));
        assert_eq!(hunks[1].old_start, 20);
    }

    #[test]
    fn test_not_a_diff() {
        assert!(parse_patch("just some words\n").is_empty());
        assert!(parse_patch("").is_empty());
    }

    #[test]
    fn test_timestamp_suffix_is_stripped_from_paths() {
        let text = "--- a/x.c\t2024-01-01 00:00:00\n+++ b/x.c\t2024-01-02 00:00:00\n@@ -1 +1 @@\n-a\n+b\n";
        let files = parse_patch(text);
        assert_eq!(files[0].old_path, "x.c");
        assert_eq!(files[0].new_path, "x.c");
    }
}
