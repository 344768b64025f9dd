//! Three-way merge of a single file.
//!
//! `merge_file` has no side effects: it receives the three stage contents and
//! returns the merged content, so callers may evaluate paths independently.

use similar::{capture_diff_slices, Algorithm, DiffTag};
use std::ops::Range;

/// Bytes inspected when deciding whether content is binary
const BINARY_SNIFF_LEN: usize = 8000;

/// Content and file mode of one stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileVersion {
    pub content: Vec<u8>,
    pub mode: u32,
}

#[derive(Debug, Clone)]
pub struct FileMergeInput<'a> {
    pub base: Option<&'a FileVersion>,
    pub ours: Option<&'a FileVersion>,
    pub theirs: Option<&'a FileVersion>,
    pub ours_label: &'a str,
    pub theirs_label: &'a str,
}

/// Merged file; `content == None` means the path is deleted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMerge {
    pub content: Option<Vec<u8>>,
    pub mode: u32,
    pub conflicted: bool,
}

impl FileMerge {
    fn take(version: Option<&FileVersion>) -> Self {
        Self {
            content: version.map(|v| v.content.clone()),
            mode: version.map_or(0, |v| v.mode),
            conflicted: false,
        }
    }

    fn conflicted(version: &FileVersion) -> Self {
        Self {
            content: Some(version.content.clone()),
            mode: version.mode,
            conflicted: true,
        }
    }
}

pub fn merge_file(input: &FileMergeInput<'_>) -> FileMerge {
    let FileMergeInput {
        base, ours, theirs, ..
    } = *input;

    if ours == theirs {
        return FileMerge::take(ours);
    }
    if ours == base {
        return FileMerge::take(theirs);
    }
    if theirs == base {
        return FileMerge::take(ours);
    }

    let (ours, theirs) = match (ours, theirs) {
        (Some(ours), Some(theirs)) => (ours, theirs),
        // modify/delete: keep the surviving content for the user to decide
        (Some(kept), None) | (None, Some(kept)) => return FileMerge::conflicted(kept),
        (None, None) => return FileMerge::take(None),
    };

    if is_binary(&ours.content)
        || is_binary(&theirs.content)
        || base.is_some_and(|b| is_binary(&b.content))
    {
        return FileMerge::conflicted(ours);
    }

    let (mode, mode_conflict) = merge_mode(base.map(|b| b.mode), ours.mode, theirs.mode);
    let base_content = base.map_or(&[][..], |b| b.content.as_slice());
    let (content, text_conflict) = merge_text(
        base_content,
        &ours.content,
        &theirs.content,
        input.ours_label,
        input.theirs_label,
    );

    FileMerge {
        content: Some(content),
        mode,
        conflicted: text_conflict || mode_conflict,
    }
}

fn merge_mode(base: Option<u32>, ours: u32, theirs: u32) -> (u32, bool) {
    if ours == theirs || base == Some(theirs) {
        (ours, false)
    } else if base == Some(ours) {
        (theirs, false)
    } else {
        (ours, true)
    }
}

fn is_binary(content: &[u8]) -> bool {
    content[..content.len().min(BINARY_SNIFF_LEN)].contains(&0)
}

/// A changed region: `base` lines replaced by `side` lines
#[derive(Debug, Clone)]
struct Hunk {
    base: Range<usize>,
    side: Range<usize>,
}

fn split_lines(data: &[u8]) -> Vec<&[u8]> {
    data.split_inclusive(|&b| b == b'\n').collect()
}

fn hunks(base: &[&[u8]], side: &[&[u8]]) -> Vec<Hunk> {
    capture_diff_slices(Algorithm::Myers, base, side)
        .into_iter()
        .filter_map(|op| {
            let (tag, base, side) = op.as_tag_tuple();
            (tag != DiffTag::Equal).then_some(Hunk { base, side })
        })
        .collect()
}

/// Line-based diff3. Changes from both sides that touch or overlap the same base
/// lines conflict unless they are identical.
fn merge_text(
    base: &[u8],
    ours: &[u8],
    theirs: &[u8],
    ours_label: &str,
    theirs_label: &str,
) -> (Vec<u8>, bool) {
    let base_lines = split_lines(base);
    let ours_lines = split_lines(ours);
    let theirs_lines = split_lines(theirs);
    let ours_hunks = hunks(&base_lines, &ours_lines);
    let theirs_hunks = hunks(&base_lines, &theirs_lines);

    let mut out = Vec::with_capacity(ours.len().max(theirs.len()));
    let mut conflicted = false;
    let (mut i, mut j, mut pos) = (0, 0, 0);

    while i < ours_hunks.len() || j < theirs_hunks.len() {
        let start = match (ours_hunks.get(i), theirs_hunks.get(j)) {
            (Some(a), Some(b)) => a.base.start.min(b.base.start),
            (Some(a), None) => a.base.start,
            (None, Some(b)) => b.base.start,
            (None, None) => break,
        };

        let (first_ours, first_theirs) = (i, j);
        let mut end = start;
        loop {
            let mut grew = false;
            while let Some(h) = ours_hunks.get(i).filter(|h| h.base.start <= end) {
                end = end.max(h.base.end);
                i += 1;
                grew = true;
            }
            while let Some(h) = theirs_hunks.get(j).filter(|h| h.base.start <= end) {
                end = end.max(h.base.end);
                j += 1;
                grew = true;
            }
            if !grew {
                break;
            }
        }

        base_lines[pos..start]
            .iter()
            .for_each(|line| out.extend_from_slice(line));

        let ours_group = &ours_hunks[first_ours..i];
        let theirs_group = &theirs_hunks[first_theirs..j];
        if theirs_group.is_empty() {
            out.extend(region(&base_lines, &ours_lines, ours_group, start, end));
        } else if ours_group.is_empty() {
            out.extend(region(&base_lines, &theirs_lines, theirs_group, start, end));
        } else {
            let ours_region = region(&base_lines, &ours_lines, ours_group, start, end);
            let theirs_region = region(&base_lines, &theirs_lines, theirs_group, start, end);
            if ours_region == theirs_region {
                out.extend(ours_region);
            } else {
                conflicted = true;
                write_marker(&mut out, "<<<<<<<", ours_label);
                push_terminated(&mut out, &ours_region);
                out.extend_from_slice(b"=======\n");
                push_terminated(&mut out, &theirs_region);
                write_marker(&mut out, ">>>>>>>", theirs_label);
            }
        }

        pos = end;
    }

    base_lines[pos..]
        .iter()
        .for_each(|line| out.extend_from_slice(line));

    (out, conflicted)
}

/// One side's version of base lines `start..end`
fn region(base: &[&[u8]], side: &[&[u8]], hunks: &[Hunk], start: usize, end: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut pos = start;
    for hunk in hunks {
        base[pos..hunk.base.start]
            .iter()
            .chain(side[hunk.side.clone()].iter())
            .for_each(|line| out.extend_from_slice(line));
        pos = hunk.base.end;
    }
    base[pos..end]
        .iter()
        .for_each(|line| out.extend_from_slice(line));
    out
}

fn write_marker(out: &mut Vec<u8>, marker: &str, label: &str) {
    out.extend_from_slice(marker.as_bytes());
    out.push(b' ');
    out.extend_from_slice(label.as_bytes());
    out.push(b'\n');
}

fn push_terminated(out: &mut Vec<u8>, content: &[u8]) {
    out.extend_from_slice(content);
    if content.last().is_some_and(|&b| b != b'\n') {
        out.push(b'\n');
    }
}
