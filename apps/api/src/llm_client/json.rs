//! Best-effort recovery of a JSON object from free-form model output.
//!
//! Models are asked for bare JSON but regularly wrap it in code fences, add a
//! sentence before or after it, leave trailing commas, or get cut off mid-way.
//! Candidates are tried strictly first, then again after a repair pass.

use serde_json::Value;

/// Returns the first JSON object that can be recovered from `text`.
pub fn extract_json(text: &str) -> Option<Value> {
    let candidates = candidates(text);

    candidates
        .iter()
        .find_map(|c| parse_object(c))
        .or_else(|| candidates.iter().find_map(|c| parse_object(&repair(c))))
}

fn parse_object(candidate: &str) -> Option<Value> {
    serde_json::from_str::<Value>(candidate.trim())
        .ok()
        .filter(Value::is_object)
}

/// Whole text, then fenced blocks, then every top-level `{...}` region.
fn candidates(text: &str) -> Vec<String> {
    let text = text.trim();
    let mut out = vec![text.to_string()];
    out.extend(fenced_blocks(text));
    out.extend(brace_regions(text));
    out
}

/// Contents of ```` ```lang ... ``` ```` blocks. An unterminated block runs to the end.
fn fenced_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut rest = text;

    while let Some(open) = rest.find("```") {
        let after_fence = &rest[open + 3..];
        // skip the info string (e.g. `json`) up to the end of the line
        let body_start = match after_fence.find('\n') {
            Some(nl) if !after_fence[..nl].contains('{') => nl + 1,
            _ => 0,
        };
        let body = &after_fence[body_start..];
        match body.find("```") {
            Some(close) => {
                blocks.push(body[..close].trim().to_string());
                rest = &body[close + 3..];
            }
            None => {
                blocks.push(body.trim().to_string());
                break;
            }
        }
    }
    blocks
}

/// Balanced top-level `{...}` regions, skipping braces inside string literals.
/// A region still open at the end of input is returned as-is for the repair pass.
fn brace_regions(text: &str) -> Vec<String> {
    let mut regions = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        regions.push(text[s..=i].to_string());
                    }
                }
            }
            _ => {}
        }
    }

    if let Some(s) = start {
        regions.push(text[s..].to_string());
    }
    regions
}

/// Drops `//` comments and trailing commas, then closes whatever is still open.
fn repair(candidate: &str) -> String {
    let chars: Vec<char> = candidate.trim().chars().collect();
    let mut out = String::with_capacity(chars.len() + 8);
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    // start of an object key whose `:` has not been seen yet
    let mut pending_key: Option<usize> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        match c {
            '"' => {
                if stack.last() == Some(&'{') && out.trim_end().ends_with(['{', ',']) {
                    pending_key = Some(out.len());
                }
                in_string = true;
                out.push(c);
            }
            ':' => {
                pending_key = None;
                out.push(c);
            }
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '{' | '[' => {
                stack.push(c);
                out.push(c);
            }
            '}' | ']' => {
                pending_key = None;
                drop_trailing_comma(&mut out);
                stack.pop();
                out.push(c);
            }
            _ => out.push(c),
        }
        i += 1;
    }

    if in_string {
        if escaped {
            out.pop();
        }
        out.push('"');
    }

    // a key cut off before its value cannot be kept
    if let Some(key_start) = pending_key {
        out.truncate(key_start);
    }

    let trimmed_len = out.trim_end().len();
    out.truncate(trimmed_len);
    if out.ends_with(':') {
        out.push_str("null");
    }
    drop_trailing_comma(&mut out);

    while let Some(open) = stack.pop() {
        drop_trailing_comma(&mut out);
        out.push(if open == '{' { '}' } else { ']' });
    }
    out
}

fn drop_trailing_comma(out: &mut String) {
    let trimmed_len = out.trim_end().len();
    if out[..trimmed_len].ends_with(',') {
        out.truncate(trimmed_len - 1);
    }
}
