//! Line-granularity merge for files that changed on both sides.
//!
//! The artifact is the union of both versions: shared lines pass through,
//! lines only in the local version are prefixed with [`REMOVED_MARKER`], lines
//! only in the remote version with [`ADDED_MARKER`]. The same bytes are written
//! to both sides, so the next run sees matching hashes and leaves the file
//! alone. Markers from an earlier merge are stripped before diffing so repeated
//! conflicts never nest.

use std::collections::HashMap;
use thiserror::Error;

/// Prefix for a line present only in the local version.
pub const REMOVED_MARKER: char = '⊖';
/// Prefix for a line present only in the remote version.
pub const ADDED_MARKER: char = '⊕';

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("{side} content is not valid UTF-8")]
    Decode { side: &'static str },
}

pub type Result<T> = std::result::Result<T, MergeError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffOp {
    Equal,
    Delete,
    Insert,
}

/// A run of lines sharing one operation. Lines keep their trailing `\n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffSegment {
    pub op: DiffOp,
    pub lines: Vec<String>,
}

/// Merge two divergent contents into one annotated artifact.
pub fn merge(local: &[u8], remote: &[u8]) -> Result<Vec<u8>> {
    let local = std::str::from_utf8(local).map_err(|_| MergeError::Decode { side: "local" })?;
    let remote = std::str::from_utf8(remote).map_err(|_| MergeError::Decode { side: "remote" })?;

    let local = strip_markers(&ensure_trailing_newline(local));
    let remote = strip_markers(&ensure_trailing_newline(remote));

    Ok(render(&diff_lines(&local, &remote)).into_bytes())
}

/// Line diff from `a` to `b`.
///
/// Lines are interned to integer codes, the common prefix and suffix are
/// trimmed, and the remaining middle is expressed as a pure insertion or
/// deletion, a containment (one middle inside the other), or a single
/// delete/insert pair.
pub fn diff_lines(a: &str, b: &str) -> Vec<DiffSegment> {
    let mut interner = LineInterner::default();
    let a_codes = interner.intern_all(a);
    let b_codes = interner.intern_all(b);

    let prefix = common_prefix(&a_codes, &b_codes);
    let suffix = common_suffix(&a_codes[prefix..], &b_codes[prefix..]);
    let a_mid = &a_codes[prefix..a_codes.len() - suffix];
    let b_mid = &b_codes[prefix..b_codes.len() - suffix];

    let mut ops: Vec<(DiffOp, &[usize])> = Vec::new();
    ops.push((DiffOp::Equal, &a_codes[..prefix]));

    if a_mid.is_empty() {
        ops.push((DiffOp::Insert, b_mid));
    } else if b_mid.is_empty() {
        ops.push((DiffOp::Delete, a_mid));
    } else if let Some(at) = find_subslice(b_mid, a_mid) {
        ops.push((DiffOp::Insert, &b_mid[..at]));
        ops.push((DiffOp::Equal, a_mid));
        ops.push((DiffOp::Insert, &b_mid[at + a_mid.len()..]));
    } else if let Some(at) = find_subslice(a_mid, b_mid) {
        ops.push((DiffOp::Delete, &a_mid[..at]));
        ops.push((DiffOp::Equal, b_mid));
        ops.push((DiffOp::Delete, &a_mid[at + b_mid.len()..]));
    } else {
        ops.push((DiffOp::Delete, a_mid));
        ops.push((DiffOp::Insert, b_mid));
    }

    ops.push((DiffOp::Equal, &a_codes[a_codes.len() - suffix..]));

    ops.into_iter()
        .filter(|(_, codes)| !codes.is_empty())
        .map(|(op, codes)| DiffSegment {
            op,
            lines: codes.iter().map(|&c| interner.line(c).to_string()).collect(),
        })
        .collect()
}

/// Render segments as the merge artifact.
pub fn render(segments: &[DiffSegment]) -> String {
    let mut out = String::new();
    for segment in segments {
        let marker = match segment.op {
            DiffOp::Equal => None,
            DiffOp::Delete => Some(REMOVED_MARKER),
            DiffOp::Insert => Some(ADDED_MARKER),
        };
        for line in &segment.lines {
            if let Some(marker) = marker {
                out.push(marker);
                out.push(' ');
            }
            out.push_str(line);
        }
    }
    out
}

/// Remove markers left by a previous merge from the start of every line.
pub fn strip_markers(content: &str) -> String {
    content
        .split_inclusive('\n')
        .map(|line| {
            line.strip_prefix(REMOVED_MARKER)
                .or_else(|| line.strip_prefix(ADDED_MARKER))
                .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
                .unwrap_or(line)
        })
        .collect()
}

/// Empty content stays empty so it diffs as zero lines.
fn ensure_trailing_newline(content: &str) -> String {
    let mut owned = content.to_string();
    if !owned.is_empty() && !owned.ends_with('\n') {
        owned.push('\n');
    }
    owned
}

/// Maps each distinct line to a small integer code and back.
#[derive(Default)]
struct LineInterner {
    codes: HashMap<String, usize>,
    lines: Vec<String>,
}

impl LineInterner {
    fn intern_all(&mut self, text: &str) -> Vec<usize> {
        text.split_inclusive('\n')
            .map(|line| self.intern(line))
            .collect()
    }

    fn intern(&mut self, line: &str) -> usize {
        if let Some(&code) = self.codes.get(line) {
            return code;
        }
        let code = self.lines.len();
        self.lines.push(line.to_string());
        self.codes.insert(line.to_string(), code);
        code
    }

    fn line(&self, code: usize) -> &str {
        &self.lines[code]
    }
}

fn common_prefix(a: &[usize], b: &[usize]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

fn common_suffix(a: &[usize], b: &[usize]) -> usize {
    a.iter()
        .rev()
        .zip(b.iter().rev())
        .take_while(|(x, y)| x == y)
        .count()
}

/// Position of the first occurrence of `needle` in `haystack`.
fn find_subslice(haystack: &[usize], needle: &[usize]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
