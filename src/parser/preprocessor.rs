use crate::diagnostics::{Diagnostic, Position};
use crate::error::CompileError;
use std::collections::BTreeSet;

const FLAG_MARKER: &str = "// flag:";

/// Source text with directive lines and inactive regions blanked out.
/// Blanking keeps every byte offset, so positions in the processed text are
/// positions in the original.
#[derive(Debug, Clone, PartialEq)]
pub struct Preprocessed {
    pub text: String,
    /// 1-based line numbers that were blanked.
    pub blanked_lines: Vec<u32>,
}

struct Region {
    opened_at: Position,
    active: bool,
    parent_active: bool,
    seen_else: bool,
}

/// Evaluate `#if SYMBOL` / `#if !SYMBOL` / `#else` / `#endif` regions
/// against the defined symbols.
pub fn preprocess(source: &str, symbols: &BTreeSet<String>) -> Result<Preprocessed, CompileError> {
    let mut text = String::with_capacity(source.len());
    let mut blanked_lines = Vec::new();
    let mut diagnostics = Vec::new();
    let mut stack: Vec<Region> = Vec::new();
    let mut offset = 0usize;

    for (index, raw) in source.split_inclusive('\n').enumerate() {
        let line_no = index as u32 + 1;
        let trimmed = raw.trim();
        let indent = raw.len() - raw.trim_start().len();
        let pos = Position::new(line_no, indent as u32 + 1, offset + indent);
        let active = stack.last().map_or(true, |r| r.active);

        let directive = if let Some(rest) = trimmed.strip_prefix("#if") {
            let symbol = rest.trim();
            if symbol.is_empty() {
                diagnostics.push(Diagnostic::error(pos, "#if requires a symbol"));
            }
            let value = match symbol.strip_prefix('!') {
                Some(sym) => !symbols.contains(sym.trim()),
                None => symbols.contains(symbol),
            };
            stack.push(Region {
                opened_at: pos,
                active: active && value,
                parent_active: active,
                seen_else: false,
            });
            true
        } else if trimmed == "#else" {
            match stack.last_mut() {
                Some(region) if !region.seen_else => {
                    region.seen_else = true;
                    region.active = region.parent_active && !region.active;
                }
                Some(_) => diagnostics.push(Diagnostic::error(pos, "duplicate #else")),
                None => diagnostics.push(Diagnostic::error(pos, "#else without matching #if")),
            }
            true
        } else if trimmed == "#endif" {
            if stack.pop().is_none() {
                diagnostics.push(Diagnostic::error(pos, "#endif without matching #if"));
            }
            true
        } else {
            false
        };

        if directive || !active {
            blanked_lines.push(line_no);
            for c in raw.chars() {
                match c {
                    '\n' | '\r' => text.push(c),
                    // one space per byte keeps offsets stable
                    other => text.extend(std::iter::repeat(' ').take(other.len_utf8())),
                }
            }
        } else {
            text.push_str(raw);
        }
        offset += raw.len();
    }

    for region in stack {
        diagnostics.push(Diagnostic::error(region.opened_at, "#if without matching #endif"));
    }

    if diagnostics.is_empty() {
        Ok(Preprocessed {
            text,
            blanked_lines,
        })
    } else {
        Err(CompileError::new(diagnostics))
    }
}

/// Names set by `// flag: name` comment lines.
pub fn text_flags(source: &str) -> Vec<String> {
    source
        .lines()
        .filter_map(|line| line.trim().strip_prefix(FLAG_MARKER))
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}
