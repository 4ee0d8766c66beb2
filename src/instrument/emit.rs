use super::{TraceKind, TraceTable};
use crate::parser::lexer::RESERVED_PREFIX;

/// Re-emit the original source with trace calls inlined at the exact offsets
/// the instrumentation pass recorded. Preprocessor lines and comments are
/// copied through untouched.
pub fn render(source: &str, table: &TraceTable) -> String {
    // (offset, rank, text); rank orders insertions sharing an offset
    let mut inserts: Vec<(usize, u8, String)> = Vec::new();

    for function in &table.functions {
        if let Some(open) = function.body_open {
            inserts.push((
                open.offset + 1,
                0,
                format!("{}enter({}); ", RESERVED_PREFIX, function.position.line),
            ));
        }
    }
    for slot in table.loops.iter().filter(|l| !l.vars.is_empty()) {
        let mut locals = slot.cache_locals.clone();
        locals.push(slot.entered_local.clone());
        inserts.push((
            slot.position.offset,
            1,
            format!("{}loop({}, {}); ", RESERVED_PREFIX, slot.id.0, locals.join(", ")),
        ));
        inserts.push((
            slot.cache_at,
            3,
            format!("{}cache({}); ", RESERVED_PREFIX, slot.id.0),
        ));
    }
    for point in &table.points {
        let text = match point.kind {
            TraceKind::Statement | TraceKind::Catch => format!(
                "{}trace({}, {}); ",
                RESERVED_PREFIX, point.position.line, point.sub
            ),
            TraceKind::LoopCheck => format!(
                "{}check({}, {}) ",
                RESERVED_PREFIX, point.position.line, point.sub
            ),
        };
        inserts.push((point.insert_at, 2, text));
    }
    inserts.sort_by_key(|(offset, rank, _)| (*offset, *rank));

    let mut out = String::with_capacity(source.len() + inserts.len() * 24);
    let mut cursor = 0usize;
    for (offset, _, text) in inserts {
        let offset = offset.min(source.len());
        if offset > cursor {
            out.push_str(&source[cursor..offset]);
            cursor = offset;
        }
        out.push_str(&text);
    }
    out.push_str(&source[cursor..]);
    out
}

/// Remove every rendered trace call, giving back the original text.
pub fn strip_rendered(rendered: &str) -> String {
    let mut out = String::with_capacity(rendered.len());
    let mut rest = rendered;
    while let Some(start) = rest.find(RESERVED_PREFIX) {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let Some(close) = tail.find(')') else {
            out.push_str(tail);
            rest = "";
            break;
        };
        let after = &tail[close + 1..];
        rest = after
            .strip_prefix("; ")
            .or_else(|| after.strip_prefix(' '))
            .unwrap_or(after);
    }
    out.push_str(rest);
    out
}
