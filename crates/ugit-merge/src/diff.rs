//! Line-level diff used by the three-way content merge.
//!
//! Patience-style: anchor on lines unique to both sides, take the longest
//! increasing chain of anchors, recurse between them. Regions with no
//! unique common lines degrade to delete-then-insert, which is exactly what
//! a conflict-oriented consumer wants.

use std::collections::HashMap;

/// An edit operation in the edit script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOp {
    /// Line present in both sequences.
    Equal,
    /// Line only in the new sequence.
    Insert,
    /// Line only in the old sequence.
    Delete,
}

/// One edit, referencing lines by index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edit {
    pub op: EditOp,
    /// Index into the old sequence (Equal and Delete).
    pub old_index: usize,
    /// Index into the new sequence (Equal and Insert).
    pub new_index: usize,
}

/// Split into lines without their terminators; a trailing newline does not
/// produce an empty final line.
pub fn split_lines(data: &[u8]) -> Vec<&[u8]> {
    if data.is_empty() {
        return Vec::new();
    }
    let mut lines: Vec<&[u8]> = data.split(|&b| b == b'\n').collect();
    if data.ends_with(b"\n") {
        lines.pop();
    }
    lines
}

/// Diff two line sequences.
pub fn diff(old: &[&[u8]], new: &[&[u8]]) -> Vec<Edit> {
    let mut edits = Vec::new();
    recurse(old, new, 0, old.len(), 0, new.len(), &mut edits);
    edits
}

/// Convenience: diff two byte buffers line-wise.
pub fn diff_bytes(old: &[u8], new: &[u8]) -> Vec<Edit> {
    diff(&split_lines(old), &split_lines(new))
}

fn recurse(
    old: &[&[u8]],
    new: &[&[u8]],
    mut old_lo: usize,
    mut old_hi: usize,
    mut new_lo: usize,
    mut new_hi: usize,
    edits: &mut Vec<Edit>,
) {
    // Common prefix.
    while old_lo < old_hi && new_lo < new_hi && old[old_lo] == new[new_lo] {
        edits.push(Edit {
            op: EditOp::Equal,
            old_index: old_lo,
            new_index: new_lo,
        });
        old_lo += 1;
        new_lo += 1;
    }

    // Common suffix, emitted after the middle is handled.
    let mut suffix = 0;
    while old_hi > old_lo && new_hi > new_lo && old[old_hi - 1] == new[new_hi - 1] {
        old_hi -= 1;
        new_hi -= 1;
        suffix += 1;
    }

    if old_lo == old_hi || new_lo == new_hi {
        emit_plain(old_lo, old_hi, new_lo, new_hi, edits);
    } else {
        match anchors(old, new, old_lo, old_hi, new_lo, new_hi) {
            Some(chain) => {
                let mut prev_old = old_lo;
                let mut prev_new = new_lo;
                for (o, n) in chain {
                    recurse(old, new, prev_old, o, prev_new, n, edits);
                    edits.push(Edit {
                        op: EditOp::Equal,
                        old_index: o,
                        new_index: n,
                    });
                    prev_old = o + 1;
                    prev_new = n + 1;
                }
                recurse(old, new, prev_old, old_hi, prev_new, new_hi, edits);
            }
            None => emit_plain(old_lo, old_hi, new_lo, new_hi, edits),
        }
    }

    for i in 0..suffix {
        edits.push(Edit {
            op: EditOp::Equal,
            old_index: old_hi + i,
            new_index: new_hi + i,
        });
    }
}

/// Replace a whole region: deletes then inserts.
fn emit_plain(
    old_lo: usize,
    old_hi: usize,
    new_lo: usize,
    new_hi: usize,
    edits: &mut Vec<Edit>,
) {
    for i in old_lo..old_hi {
        edits.push(Edit {
            op: EditOp::Delete,
            old_index: i,
            new_index: new_lo,
        });
    }
    for i in new_lo..new_hi {
        edits.push(Edit {
            op: EditOp::Insert,
            old_index: old_hi,
            new_index: i,
        });
    }
}

/// Longest increasing chain of lines unique within both ranges.
fn anchors(
    old: &[&[u8]],
    new: &[&[u8]],
    old_lo: usize,
    old_hi: usize,
    new_lo: usize,
    new_hi: usize,
) -> Option<Vec<(usize, usize)>> {
    #[derive(Default)]
    struct Count {
        old: usize,
        new: usize,
        old_index: usize,
        new_index: usize,
    }
    let mut counts: HashMap<&[u8], Count> = HashMap::new();
    for (i, line) in old[old_lo..old_hi].iter().enumerate() {
        let c = counts.entry(line).or_default();
        c.old += 1;
        c.old_index = old_lo + i;
    }
    for (i, line) in new[new_lo..new_hi].iter().enumerate() {
        let c = counts.entry(line).or_default();
        c.new += 1;
        c.new_index = new_lo + i;
    }

    // Pairs of mutually unique lines, ordered by old position.
    let mut pairs: Vec<(usize, usize)> = counts
        .values()
        .filter(|c| c.old == 1 && c.new == 1)
        .map(|c| (c.old_index, c.new_index))
        .collect();
    if pairs.is_empty() {
        return None;
    }
    pairs.sort_unstable();

    // Longest chain increasing in the new position (patience sorting).
    let mut tails: Vec<usize> = Vec::new(); // indices into pairs
    let mut back: Vec<Option<usize>> = vec![None; pairs.len()];
    for (i, &(_, n)) in pairs.iter().enumerate() {
        let pos = tails.partition_point(|&t| pairs[t].1 < n);
        if pos > 0 {
            back[i] = Some(tails[pos - 1]);
        }
        if pos == tails.len() {
            tails.push(i);
        } else {
            tails[pos] = i;
        }
    }

    let mut chain = Vec::new();
    let mut cursor = tails.last().copied();
    while let Some(i) = cursor {
        chain.push(pairs[i]);
        cursor = back[i];
    }
    chain.reverse();
    Some(chain)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Replay an edit script and check it transforms old into new, and that
    /// Equal edits really reference equal lines in ascending order.
    fn verify(old: &[u8], new: &[u8]) -> Vec<Edit> {
        let old_lines = split_lines(old);
        let new_lines = split_lines(new);
        let edits = diff_bytes(old, new);

        let mut rebuilt: Vec<&[u8]> = Vec::new();
        let mut consumed_old = 0;
        for e in &edits {
            match e.op {
                EditOp::Equal => {
                    assert_eq!(old_lines[e.old_index], new_lines[e.new_index]);
                    assert!(e.old_index >= consumed_old);
                    consumed_old = e.old_index + 1;
                    rebuilt.push(new_lines[e.new_index]);
                }
                EditOp::Insert => rebuilt.push(new_lines[e.new_index]),
                EditOp::Delete => {
                    assert!(e.old_index >= consumed_old);
                    consumed_old = e.old_index + 1;
                }
            }
        }
        assert_eq!(rebuilt, new_lines, "old={:?} new={:?}", old, new);
        edits
    }

    #[test]
    fn identical_is_all_equal() {
        let edits = verify(b"a\nb\nc\n", b"a\nb\nc\n");
        assert!(edits.iter().all(|e| e.op == EditOp::Equal));
        assert_eq!(edits.len(), 3);
    }

    #[test]
    fn single_line_change() {
        let edits = verify(b"a\nb\nc\n", b"a\nX\nc\n");
        assert_eq!(edits.iter().filter(|e| e.op == EditOp::Delete).count(), 1);
        assert_eq!(edits.iter().filter(|e| e.op == EditOp::Insert).count(), 1);
    }

    #[test]
    fn pure_insert_and_delete() {
        verify(b"", b"a\nb\n");
        verify(b"a\nb\n", b"");
        verify(b"a\nc\n", b"a\nb\nc\n");
        verify(b"a\nb\nc\n", b"a\nc\n");
    }

    #[test]
    fn disjoint_content() {
        let edits = verify(b"a\nb\n", b"x\ny\nz\n");
        assert!(!edits.iter().any(|e| e.op == EditOp::Equal));
    }

    #[test]
    fn no_trailing_newline() {
        verify(b"a\nb", b"a\nb\nc");
        verify(b"one line", b"another line");
    }

    #[test]
    fn unique_anchors_survive_noise() {
        // "anchor1"/"anchor2" are unique on both sides; the repeated "x"
        // lines are not, yet the anchors must still line up as Equal.
        let edits = verify(
            b"x\nanchor1\nx\nx\nanchor2\nx\n",
            b"x\nx\nanchor1\nx\nanchor2\ny\nx\n",
        );
        let equal_count = edits.iter().filter(|e| e.op == EditOp::Equal).count();
        assert!(equal_count >= 2);
    }

    #[test]
    fn moved_block_keeps_order() {
        verify(b"a\nb\nc\nd\ne\n", b"c\nd\ne\na\nb\n");
    }
}
