use std::fmt::{Display, Formatter};

use colored::Colorize;

use crate::store::{Demonstration, Program};

/// One line of the instruction diff, in presentation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DiffLine {
    Unchanged(String),
    Removed(String),
    Added(String),
}

/// Demonstration set difference by content. `reordered` is true when both
/// programs share demonstrations but list them in a different relative order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct DemonstrationDiff {
    pub(crate) added: Vec<Demonstration>,
    pub(crate) removed: Vec<Demonstration>,
    pub(crate) reordered: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ProgramDiff {
    pub(crate) program_a: i64,
    pub(crate) program_b: i64,
    pub(crate) instruction: Vec<DiffLine>,
    pub(crate) demonstrations: DemonstrationDiff,
}

impl ProgramDiff {
    pub(crate) fn is_empty(&self) -> bool {
        self.instruction
            .iter()
            .all(|line| matches!(line, DiffLine::Unchanged(_)))
            && self.demonstrations == DemonstrationDiff::default()
    }
}

/// Read-side comparison of two stored programs. Touches nothing but the two
/// records it is handed.
pub(crate) fn diff(a: &Program, b: &Program) -> ProgramDiff {
    ProgramDiff {
        program_a: a.id,
        program_b: b.id,
        instruction: diff_lines(&a.instruction, &b.instruction),
        demonstrations: diff_demonstrations(&a.demonstrations, &b.demonstrations),
    }
}

/// Longest-common-subsequence line diff, removals before additions at each
/// divergence.
fn diff_lines(a: &str, b: &str) -> Vec<DiffLine> {
    let a = a.lines().collect::<Vec<_>>();
    let b = b.lines().collect::<Vec<_>>();

    let mut lcs = vec![vec![0usize; b.len() + 1]; a.len() + 1];
    for (i, line_a) in a.iter().enumerate().rev() {
        for (j, line_b) in b.iter().enumerate().rev() {
            lcs[i][j] = if line_a == line_b {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut lines = vec![];
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i] == b[j] {
            lines.push(DiffLine::Unchanged(a[i].to_string()));
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            lines.push(DiffLine::Removed(a[i].to_string()));
            i += 1;
        } else {
            lines.push(DiffLine::Added(b[j].to_string()));
            j += 1;
        }
    }
    lines.extend(a[i..].iter().map(|line| DiffLine::Removed(line.to_string())));
    lines.extend(b[j..].iter().map(|line| DiffLine::Added(line.to_string())));
    lines
}

fn diff_demonstrations(a: &[Demonstration], b: &[Demonstration]) -> DemonstrationDiff {
    let added = b
        .iter()
        .filter(|demo| !a.contains(demo))
        .cloned()
        .collect::<Vec<_>>();
    let removed = a
        .iter()
        .filter(|demo| !b.contains(demo))
        .cloned()
        .collect::<Vec<_>>();

    // Relative order of the shared demonstrations, seen from each side.
    let shared_in_a = a.iter().filter(|demo| b.contains(demo));
    let shared_in_b = b.iter().filter(|demo| a.contains(demo));
    let reordered = !shared_in_a.eq(shared_in_b);

    DemonstrationDiff {
        added,
        removed,
        reordered,
    }
}

impl Display for ProgramDiff {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{}",
            format!("--- program {}", self.program_a).bold()
        )?;
        writeln!(
            f,
            "{}",
            format!("+++ program {}", self.program_b).bold()
        )?;
        for line in &self.instruction {
            match line {
                DiffLine::Unchanged(text) => writeln!(f, "  {text}")?,
                DiffLine::Removed(text) => writeln!(f, "{}", format!("- {text}").red())?,
                DiffLine::Added(text) => writeln!(f, "{}", format!("+ {text}").green())?,
            }
        }
        for demo in &self.demonstrations.removed {
            writeln!(
                f,
                "{}",
                format!("- demo [{}] {} -> {}", demo.provenance, demo.input, demo.label).red()
            )?;
        }
        for demo in &self.demonstrations.added {
            writeln!(
                f,
                "{}",
                format!("+ demo [{}] {} -> {}", demo.provenance, demo.input, demo.label).green()
            )?;
        }
        if self.demonstrations.reordered {
            writeln!(f, "{}", "~ shared demonstrations reordered".yellow())?;
        }
        Ok(())
    }
}
