//! Unified line diff for reviewing proposed document changes

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Equal,
    Delete,
    Insert,
}

#[derive(Debug, Clone, Copy)]
struct DiffLine<'a> {
    op: Op,
    text: &'a str,
    /// Lines of the old text consumed before this one
    old_pos: usize,
    new_pos: usize,
}

/// Render a unified diff of `old` against `new`. Empty when they are equal.
pub fn unified_diff(old: &str, new: &str, old_label: &str, new_label: &str, context: usize) -> String {
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();
    let ops = line_ops(&old_lines, &new_lines);

    let changes: Vec<usize> = ops
        .iter()
        .enumerate()
        .filter(|(_, l)| l.op != Op::Equal)
        .map(|(i, _)| i)
        .collect();
    if changes.is_empty() {
        return String::new();
    }

    let mut hunks: Vec<(usize, usize)> = Vec::new();
    for &change in &changes {
        let start = change.saturating_sub(context);
        let end = (change + context + 1).min(ops.len());
        match hunks.last_mut() {
            Some(last) if start <= last.1 => last.1 = end,
            _ => hunks.push((start, end)),
        }
    }

    let mut out = format!("--- {}\n+++ {}\n", old_label, new_label);
    for (start, end) in hunks {
        let slice = &ops[start..end];
        let old_len = slice.iter().filter(|l| l.op != Op::Insert).count();
        let new_len = slice.iter().filter(|l| l.op != Op::Delete).count();
        let old_start = if old_len == 0 { slice[0].old_pos } else { slice[0].old_pos + 1 };
        let new_start = if new_len == 0 { slice[0].new_pos } else { slice[0].new_pos + 1 };
        out.push_str(&format!("@@ -{},{} +{},{} @@\n", old_start, old_len, new_start, new_len));
        for line in slice {
            let marker = match line.op {
                Op::Equal => ' ',
                Op::Delete => '-',
                Op::Insert => '+',
            };
            out.push(marker);
            out.push_str(line.text);
            out.push('\n');
        }
    }
    out
}

/// Edit script from the longest common subsequence of the two line lists
fn line_ops<'a>(old: &[&'a str], new: &[&'a str]) -> Vec<DiffLine<'a>> {
    let (n, m) = (old.len(), new.len());
    // lcs[i][j] = LCS length of old[i..] and new[j..]
    let mut lcs = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if old[i] == new[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut ops = Vec::with_capacity(n + m);
    let (mut i, mut j) = (0, 0);
    while i < n || j < m {
        if i < n && j < m && old[i] == new[j] {
            ops.push(DiffLine { op: Op::Equal, text: old[i], old_pos: i, new_pos: j });
            i += 1;
            j += 1;
        } else if i < n && (j == m || lcs[i + 1][j] >= lcs[i][j + 1]) {
            ops.push(DiffLine { op: Op::Delete, text: old[i], old_pos: i, new_pos: j });
            i += 1;
        } else {
            ops.push(DiffLine { op: Op::Insert, text: new[j], old_pos: i, new_pos: j });
            j += 1;
        }
    }
    ops
}
