//! Three-way content merge.
//!
//! Diffs base→ours and base→theirs, interleaves non-overlapping change
//! regions, and frames overlapping disagreements in conflict markers.

use ugit_config::ConflictStyle;

use crate::diff::{self, Edit, EditOp};

/// Labels rendered into conflict markers.
#[derive(Debug, Clone)]
pub struct MergeLabels<'a> {
    pub base: &'a str,
    pub ours: &'a str,
    pub theirs: &'a str,
}

impl Default for MergeLabels<'_> {
    fn default() -> Self {
        Self {
            base: "base",
            ours: "ours",
            theirs: "theirs",
        }
    }
}

/// Outcome of a content merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentMergeResult {
    Clean(Vec<u8>),
    Conflict {
        /// Merged content with conflict markers embedded.
        content: Vec<u8>,
        conflict_count: usize,
    },
}

impl ContentMergeResult {
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Clean(_))
    }

    pub fn content(&self) -> &[u8] {
        match self {
            Self::Clean(c) | Self::Conflict { content: c, .. } => c,
        }
    }
}

/// Merge `ours` and `theirs` against `base`.
pub fn merge_content(
    base: &[u8],
    ours: &[u8],
    theirs: &[u8],
    style: ConflictStyle,
    labels: &MergeLabels<'_>,
) -> ContentMergeResult {
    // Trivial resolutions first.
    if ours == theirs {
        return ContentMergeResult::Clean(ours.to_vec());
    }
    if base == ours {
        return ContentMergeResult::Clean(theirs.to_vec());
    }
    if base == theirs {
        return ContentMergeResult::Clean(ours.to_vec());
    }

    let base_lines = diff::split_lines(base);
    let ours_lines = diff::split_lines(ours);
    let theirs_lines = diff::split_lines(theirs);

    let regions_ours = change_regions(&diff::diff(&base_lines, &ours_lines));
    let regions_theirs = change_regions(&diff::diff(&base_lines, &theirs_lines));

    weave(
        &base_lines,
        &ours_lines,
        &theirs_lines,
        &regions_ours,
        &regions_theirs,
        style,
        labels,
    )
}

/// A contiguous run of changes relative to the base.
#[derive(Debug, Clone, Copy)]
struct Region {
    base_start: usize,
    base_len: usize,
    new_start: usize,
    new_len: usize,
}

impl Region {
    fn base_end(&self) -> usize {
        self.base_start + self.base_len
    }
}

/// Group consecutive non-Equal edits into regions.
fn change_regions(edits: &[Edit]) -> Vec<Region> {
    let mut regions = Vec::new();
    let mut i = 0;
    while i < edits.len() {
        if edits[i].op == EditOp::Equal {
            i += 1;
            continue;
        }
        let base_start = edits[i].old_index;
        let new_start = edits[i].new_index;
        let mut base_end = base_start;
        let mut new_end = new_start;
        while i < edits.len() && edits[i].op != EditOp::Equal {
            match edits[i].op {
                EditOp::Delete => base_end = edits[i].old_index + 1,
                EditOp::Insert => new_end = edits[i].new_index + 1,
                EditOp::Equal => unreachable!(),
            }
            i += 1;
        }
        regions.push(Region {
            base_start,
            base_len: base_end - base_start,
            new_start,
            new_len: new_end - new_start,
        });
    }
    regions
}

fn weave(
    base_lines: &[&[u8]],
    ours_lines: &[&[u8]],
    theirs_lines: &[&[u8]],
    regions_ours: &[Region],
    regions_theirs: &[Region],
    style: ConflictStyle,
    labels: &MergeLabels<'_>,
) -> ContentMergeResult {
    let mut out = Vec::new();
    let mut conflicts = 0;
    let mut base_pos = 0;
    let mut oi = 0;
    let mut ti = 0;

    while oi < regions_ours.len() || ti < regions_theirs.len() {
        match (regions_ours.get(oi), regions_theirs.get(ti)) {
            (Some(o), Some(t)) if disjoint_before(o, t) => {
                copy_base(&mut out, base_lines, base_pos, o.base_start);
                copy_lines(&mut out, ours_lines, o.new_start, o.new_len);
                base_pos = o.base_end();
                oi += 1;
            }
            (Some(o), Some(t)) if disjoint_before(t, o) => {
                copy_base(&mut out, base_lines, base_pos, t.base_start);
                copy_lines(&mut out, theirs_lines, t.new_start, t.new_len);
                base_pos = t.base_end();
                ti += 1;
            }
            (Some(o), Some(t)) => {
                // Overlap. Merge the touching spans on both sides; more
                // regions may fold into the same conflict hunk.
                let mut span_start = o.base_start.min(t.base_start);
                let mut span_end = o.base_end().max(t.base_end());
                let mut o_hi = oi + 1;
                let mut t_hi = ti + 1;
                loop {
                    let mut grew = false;
                    while o_hi < regions_ours.len()
                        && regions_ours[o_hi].base_start <= span_end
                    {
                        span_end = span_end.max(regions_ours[o_hi].base_end());
                        span_start = span_start.min(regions_ours[o_hi].base_start);
                        o_hi += 1;
                        grew = true;
                    }
                    while t_hi < regions_theirs.len()
                        && regions_theirs[t_hi].base_start <= span_end
                    {
                        span_end = span_end.max(regions_theirs[t_hi].base_end());
                        span_start = span_start.min(regions_theirs[t_hi].base_start);
                        t_hi += 1;
                        grew = true;
                    }
                    if !grew {
                        break;
                    }
                }

                copy_base(&mut out, base_lines, base_pos, span_start);

                let ours_span = side_span(
                    base_lines,
                    ours_lines,
                    &regions_ours[oi..o_hi],
                    span_start,
                    span_end,
                );
                let theirs_span = side_span(
                    base_lines,
                    theirs_lines,
                    &regions_theirs[ti..t_hi],
                    span_start,
                    span_end,
                );

                if ours_span == theirs_span {
                    out.extend_from_slice(&ours_span);
                } else {
                    conflicts += 1;
                    let mut base_span = Vec::new();
                    copy_base(&mut base_span, base_lines, span_start, span_end);
                    write_conflict(&mut out, &ours_span, &base_span, &theirs_span, style, labels);
                }

                base_pos = span_end;
                oi = o_hi;
                ti = t_hi;
            }
            (Some(o), None) => {
                copy_base(&mut out, base_lines, base_pos, o.base_start);
                copy_lines(&mut out, ours_lines, o.new_start, o.new_len);
                base_pos = o.base_end();
                oi += 1;
            }
            (None, Some(t)) => {
                copy_base(&mut out, base_lines, base_pos, t.base_start);
                copy_lines(&mut out, theirs_lines, t.new_start, t.new_len);
                base_pos = t.base_end();
                ti += 1;
            }
            (None, None) => unreachable!(),
        }
    }
    copy_base(&mut out, base_lines, base_pos, base_lines.len());

    if conflicts > 0 {
        ContentMergeResult::Conflict {
            content: out,
            conflict_count: conflicts,
        }
    } else {
        ContentMergeResult::Clean(out)
    }
}

/// Strictly-before with no touching insert ambiguity.
fn disjoint_before(a: &Region, b: &Region) -> bool {
    a.base_end() < b.base_start || (a.base_end() == b.base_start && a.base_start < b.base_start)
}

/// Render one side's view of base span `[span_start, span_end)`: its
/// changed regions plus the unchanged base lines between them.
fn side_span(
    base_lines: &[&[u8]],
    side_lines: &[&[u8]],
    regions: &[Region],
    span_start: usize,
    span_end: usize,
) -> Vec<u8> {
    let mut out = Vec::new();
    let mut pos = span_start;
    for region in regions {
        copy_base(&mut out, base_lines, pos, region.base_start);
        copy_lines(&mut out, side_lines, region.new_start, region.new_len);
        pos = region.base_end();
    }
    copy_base(&mut out, base_lines, pos, span_end);
    out
}

fn copy_base(out: &mut Vec<u8>, base_lines: &[&[u8]], from: usize, to: usize) {
    for line in base_lines.iter().take(to.min(base_lines.len())).skip(from) {
        out.extend_from_slice(line);
        out.push(b'\n');
    }
}

fn copy_lines(out: &mut Vec<u8>, lines: &[&[u8]], start: usize, count: usize) {
    for line in lines.iter().skip(start).take(count) {
        out.extend_from_slice(line);
        out.push(b'\n');
    }
}

fn write_conflict(
    out: &mut Vec<u8>,
    ours: &[u8],
    base: &[u8],
    theirs: &[u8],
    style: ConflictStyle,
    labels: &MergeLabels<'_>,
) {
    out.extend_from_slice(b"<<<<<<< ");
    out.extend_from_slice(labels.ours.as_bytes());
    out.push(b'\n');
    out.extend_from_slice(ours);
    if style == ConflictStyle::Diff3 {
        out.extend_from_slice(b"||||||| ");
        out.extend_from_slice(labels.base.as_bytes());
        out.push(b'\n');
        out.extend_from_slice(base);
    }
    out.extend_from_slice(b"=======\n");
    out.extend_from_slice(theirs);
    out.extend_from_slice(b">>>>>>> ");
    out.extend_from_slice(labels.theirs.as_bytes());
    out.push(b'\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> MergeLabels<'static> {
        MergeLabels {
            base: "base",
            ours: "HEAD",
            theirs: "feature",
        }
    }

    fn merge(base: &[u8], ours: &[u8], theirs: &[u8]) -> ContentMergeResult {
        merge_content(base, ours, theirs, ConflictStyle::Merge, &labels())
    }

    #[test]
    fn identical_sides() {
        let result = merge(b"a\nb\n", b"a\nb\nc\n", b"a\nb\nc\n");
        assert!(result.is_clean());
        assert_eq!(result.content(), b"a\nb\nc\n");
    }

    #[test]
    fn one_side_unchanged_takes_other() {
        let result = merge(b"a\nb\n", b"a\nX\n", b"a\nb\n");
        assert!(result.is_clean());
        assert_eq!(result.content(), b"a\nX\n");

        let result = merge(b"a\nb\n", b"a\nb\n", b"a\nY\n");
        assert!(result.is_clean());
        assert_eq!(result.content(), b"a\nY\n");
    }

    #[test]
    fn non_overlapping_changes_weave() {
        let result = merge(
            b"one\ntwo\nthree\nfour\nfive\n",
            b"ONE\ntwo\nthree\nfour\nfive\n",
            b"one\ntwo\nthree\nfour\nFIVE\n",
        );
        assert!(result.is_clean());
        assert_eq!(result.content(), b"ONE\ntwo\nthree\nfour\nFIVE\n");
    }

    #[test]
    fn overlapping_change_conflicts_with_markers() {
        let result = merge(b"A\nB\nC\n", b"A\nX\nC\n", b"A\nY\nC\n");
        let ContentMergeResult::Conflict {
            content,
            conflict_count,
        } = result
        else {
            panic!("expected conflict");
        };
        assert_eq!(conflict_count, 1);
        let text = String::from_utf8(content).unwrap();
        assert_eq!(
            text,
            "A\n<<<<<<< HEAD\nX\n=======\nY\n>>>>>>> feature\nC\n"
        );
    }

    #[test]
    fn diff3_includes_base_section() {
        let result = merge_content(
            b"A\nB\nC\n",
            b"A\nX\nC\n",
            b"A\nY\nC\n",
            ConflictStyle::Diff3,
            &labels(),
        );
        let text = String::from_utf8_lossy(result.content()).into_owned();
        assert!(text.contains("||||||| base\nB\n"));
        assert!(text.contains("<<<<<<< HEAD\nX\n"));
        assert!(text.contains("=======\nY\n"));
    }

    #[test]
    fn same_change_both_sides_is_clean() {
        let result = merge(b"A\nB\nC\n", b"A\nZ\nC\n", b"A\nZ\nC\n");
        assert!(result.is_clean());
    }

    #[test]
    fn add_add_different_conflicts() {
        let result = merge(b"", b"ours line\n", b"theirs line\n");
        assert!(!result.is_clean());
    }

    #[test]
    fn delete_vs_edit_conflicts() {
        let result = merge(b"A\nB\nC\n", b"A\nC\n", b"A\nB2\nC\n");
        assert!(!result.is_clean());
        let text = String::from_utf8_lossy(result.content()).into_owned();
        // Ours side of the hunk is empty (deletion), theirs carries the edit.
        assert!(text.contains("<<<<<<< HEAD\n=======\nB2\n>>>>>>> feature\n"));
    }

    #[test]
    fn adjacent_changes_do_not_conflict() {
        // Ours edits line 2, theirs edits line 4: strictly disjoint.
        let result = merge(
            b"1\n2\n3\n4\n5\n",
            b"1\nTWO\n3\n4\n5\n",
            b"1\n2\n3\nFOUR\n5\n",
        );
        assert!(result.is_clean());
        assert_eq!(result.content(), b"1\nTWO\n3\nFOUR\n5\n");
    }
}
