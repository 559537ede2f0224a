//! Outbound message chunking. Platforms cap message length (Telegram 4096,
//! WhatsApp 4096); long replies are split preferring paragraph, then line,
//! then sentence boundaries, then a hard cut.

/// Split `text` into chunks of at most `max` bytes, never splitting inside
/// a UTF-8 character.
pub fn chunk_text(text: &str, max: usize) -> Vec<String> {
    assert!(max > 0, "chunk size must be positive");
    if text.len() <= max {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    for para in split_keeping(text, "\n\n") {
        append_unit(&mut chunks, &mut current, &para, max, Level::Paragraph);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks.retain(|c| !c.trim().is_empty());
    chunks
}

#[derive(Clone, Copy, PartialEq)]
enum Level {
    Paragraph,
    Line,
    Sentence,
}

/// Append one unit to the running chunk, descending to finer splits when
/// the unit alone exceeds the budget.
fn append_unit(chunks: &mut Vec<String>, current: &mut String, unit: &str, max: usize, level: Level) {
    if current.len() + unit.len() <= max {
        current.push_str(unit);
        return;
    }
    if !current.is_empty() {
        chunks.push(std::mem::take(current));
    }
    if unit.len() <= max {
        current.push_str(unit);
        return;
    }
    match level {
        Level::Paragraph => {
            for line in split_keeping(unit, "\n") {
                append_unit(chunks, current, &line, max, Level::Line);
            }
        }
        Level::Line => {
            for sentence in split_keeping(unit, ". ") {
                append_unit(chunks, current, &sentence, max, Level::Sentence);
            }
        }
        Level::Sentence => {
            // Hard cut on char boundaries.
            let mut rest = unit;
            while rest.len() > max {
                let cut = floor_char_boundary(rest, max);
                chunks.push(rest[..cut].to_string());
                rest = &rest[cut..];
            }
            current.push_str(rest);
        }
    }
}

/// Split on `sep` but keep the separator attached to the preceding piece,
/// so re-joining the chunks reproduces the original text.
fn split_keeping(text: &str, sep: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = text;
    while let Some(idx) = rest.find(sep) {
        let end = idx + sep.len();
        out.push(rest[..end].to_string());
        rest = &rest[end..];
    }
    if !rest.is_empty() {
        out.push(rest.to_string());
    }
    out
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx.max(1)
}
