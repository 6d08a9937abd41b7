//! Target files split into editable units.
//!
//! Edits always refer to units of the *original* file, so indices stay valid
//! no matter how many edits a patch stacks on top of each other.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use similar::TextDiff;

use crate::schema::Granularity;

/// Location of a unit: target file index and unit index within that file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitRef {
    pub file: usize,
    pub unit: usize,
}

/// A single source edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceEdit {
    /// Overwrite `target` with the text of `ingredient`.
    Replacement { target: UnitRef, ingredient: UnitRef },
    /// Insert the text of `ingredient` before `target`.
    Insertion { target: UnitRef, ingredient: UnitRef },
    /// Remove `target`.
    Deletion { target: UnitRef },
}

impl SourceEdit {
    /// Unit the edit modifies.
    pub fn target(&self) -> UnitRef {
        match self {
            SourceEdit::Replacement { target, .. }
            | SourceEdit::Insertion { target, .. }
            | SourceEdit::Deletion { target } => *target,
        }
    }
}

#[derive(Debug, Clone)]
enum Piece {
    /// Text kept verbatim and never edited (blank lines, comments).
    Fixed(String),
    /// Index into `SourceFile::units`.
    Unit(usize),
}

/// One target file split according to a [`Granularity`].
#[derive(Debug, Clone)]
pub struct SourceFile {
    path: PathBuf,
    granularity: Granularity,
    pieces: Vec<Piece>,
    units: Vec<String>,
    weights: Vec<f64>,
    trailing_newline: bool,
}

#[derive(Debug, Clone, Default)]
struct Slot {
    before: Vec<String>,
    body: Option<String>,
}

impl SourceFile {
    /// Split `text` into units.
    pub fn parse<P: AsRef<Path>>(path: P, text: &str, granularity: Granularity) -> Self {
        let trailing_newline = text.ends_with('\n');
        let body = text.strip_suffix('\n').unwrap_or(text);
        let lines: Vec<&str> = if text.is_empty() {
            Vec::new()
        } else {
            body.split('\n').collect()
        };

        let (pieces, units) = match granularity {
            Granularity::Line => split_lines(&lines),
            Granularity::Statement => split_statements(&lines),
        };
        let weights = vec![1.0; units.len()];

        Self {
            path: path.as_ref().to_path_buf(),
            granularity,
            pieces,
            units,
            weights,
            trailing_newline,
        }
    }

    /// Path relative to the project root.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of editable units.
    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// Text of a unit.
    pub fn unit(&self, index: usize) -> Option<&str> {
        self.units.get(index).map(String::as_str)
    }

    /// Per-unit selection weights.
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub(crate) fn set_weights(&mut self, weights: Vec<f64>) {
        self.weights = weights;
    }

    /// Original file contents.
    pub fn original(&self) -> String {
        self.render_slots(None)
    }

    /// File contents after applying the edits that target this file.
    ///
    /// `file_index` selects which edits apply.
    pub fn render<'a, I>(&self, file_index: usize, edits: I) -> String
    where
        I: IntoIterator<Item = &'a SourceEdit>,
    {
        let mut slots: Vec<Slot> = self
            .units
            .iter()
            .map(|text| Slot {
                before: Vec::new(),
                body: Some(text.clone()),
            })
            .collect();

        for edit in edits {
            if edit.target().file != file_index {
                continue;
            }
            match *edit {
                SourceEdit::Replacement { target, ingredient } => {
                    if let Some(text) = self.transplant(ingredient.unit, target.unit)
                        && let Some(slot) = slots.get_mut(target.unit)
                    {
                        slot.body = Some(text);
                    }
                }
                SourceEdit::Insertion { target, ingredient } => {
                    if let Some(text) = self.transplant(ingredient.unit, target.unit)
                        && let Some(slot) = slots.get_mut(target.unit)
                    {
                        slot.before.push(text);
                    }
                }
                SourceEdit::Deletion { target } => {
                    let placeholder = self.deletion_placeholder(target.unit);
                    if let Some(slot) = slots.get_mut(target.unit) {
                        slot.body = placeholder;
                    }
                }
            }
        }

        self.render_slots(Some(&slots))
    }

    /// Unified diff between the original and `modified` contents.
    pub fn diff(&self, modified: &str) -> String {
        let original = self.original();
        let name = self.path.display();
        let diff = TextDiff::from_lines(original.as_str(), modified);
        diff.unified_diff()
            .context_radius(3)
            .header(&format!("a/{name}"), &format!("b/{name}"))
            .to_string()
    }

    /// Ingredient text adjusted to sit at the target's position.
    fn transplant(&self, ingredient: usize, target: usize) -> Option<String> {
        let text = self.units.get(ingredient)?;
        match self.granularity {
            Granularity::Line => Some(text.clone()),
            Granularity::Statement => {
                let target_indent = indentation(self.units.get(target)?);
                Some(reindent(text, indentation(text), target_indent))
            }
        }
    }

    /// What a deleted unit leaves behind. Statements keep the enclosing
    /// block non-empty with `pass`.
    fn deletion_placeholder(&self, target: usize) -> Option<String> {
        match self.granularity {
            Granularity::Line => Some(String::new()),
            Granularity::Statement => self
                .units
                .get(target)
                .map(|text| format!("{}pass", indentation(text))),
        }
    }

    fn render_slots(&self, slots: Option<&[Slot]>) -> String {
        let mut lines: Vec<&str> = Vec::new();
        for piece in &self.pieces {
            match piece {
                Piece::Fixed(text) => lines.push(text),
                Piece::Unit(index) => match slots.and_then(|s| s.get(*index)) {
                    Some(slot) => {
                        lines.extend(slot.before.iter().map(String::as_str));
                        if let Some(body) = &slot.body {
                            lines.push(body);
                        }
                    }
                    None => lines.push(&self.units[*index]),
                },
            }
        }

        let mut out = lines.join("\n");
        if self.trailing_newline && !lines.is_empty() {
            out.push('\n');
        }
        out
    }
}

fn split_lines(lines: &[&str]) -> (Vec<Piece>, Vec<String>) {
    let units: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
    let pieces = (0..units.len()).map(Piece::Unit).collect();
    (pieces, units)
}

fn split_statements(lines: &[&str]) -> (Vec<Piece>, Vec<String>) {
    let mut pieces = Vec::new();
    let mut units = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut scan = ScanState::default();

    for &line in lines {
        if current.is_empty() {
            let trimmed = line.trim_start();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                pieces.push(Piece::Fixed(line.to_string()));
                continue;
            }
        }

        current.push(line);
        let continues = scan.feed(line);
        if !continues {
            pieces.push(Piece::Unit(units.len()));
            units.push(current.join("\n"));
            current.clear();
            scan = ScanState::default();
        }
    }

    // Unterminated brackets or strings at EOF still form one unit.
    if !current.is_empty() {
        pieces.push(Piece::Unit(units.len()));
        units.push(current.join("\n"));
    }

    (pieces, units)
}

/// Tracks whether a logical statement continues onto the next line.
#[derive(Debug, Default)]
struct ScanState {
    depth: i32,
    triple: Option<char>,
}

impl ScanState {
    /// Consume one physical line; returns true if the statement continues.
    fn feed(&mut self, line: &str) -> bool {
        let chars: Vec<char> = line.chars().collect();
        let mut i = 0;
        let mut quote: Option<char> = None;

        while i < chars.len() {
            let c = chars[i];

            if let Some(q) = self.triple {
                if c == '\\' {
                    i += 2;
                    continue;
                }
                if c == q && chars.get(i + 1) == Some(&q) && chars.get(i + 2) == Some(&q) {
                    self.triple = None;
                    i += 3;
                    continue;
                }
                i += 1;
                continue;
            }

            if let Some(q) = quote {
                if c == '\\' {
                    i += 2;
                    continue;
                }
                if c == q {
                    quote = None;
                }
                i += 1;
                continue;
            }

            match c {
                '#' => break,
                '"' | '\'' => {
                    if chars.get(i + 1) == Some(&c) && chars.get(i + 2) == Some(&c) {
                        self.triple = Some(c);
                        i += 3;
                        continue;
                    }
                    quote = Some(c);
                }
                '(' | '[' | '{' => self.depth += 1,
                ')' | ']' | '}' => self.depth = (self.depth - 1).max(0),
                _ => {}
            }
            i += 1;
        }

        self.triple.is_some() || self.depth > 0 || line.trim_end().ends_with('\\')
    }
}

fn indentation(text: &str) -> &str {
    let first = text.lines().next().unwrap_or("");
    &first[..first.len() - first.trim_start().len()]
}

fn reindent(text: &str, from: &str, to: &str) -> String {
    text.split('\n')
        .map(|line| match line.strip_prefix(from) {
            Some(rest) => format!("{to}{rest}"),
            None => line.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}
