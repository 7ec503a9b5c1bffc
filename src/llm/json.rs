//! JSON handling for model output.
//!
//! Models wrap JSON in markdown fences or prepend prose more often than
//! not. Every caller that expects JSON goes through [`parse_json_lenient`]:
//! strip fences first, then parse, so there is exactly one place that
//! knows about the sanitization rules.

/// System message prepended on the single retry after a parse failure.
pub const STRICT_JSON_SYSTEM_MESSAGE: &str = "You MUST respond with a single valid JSON object and nothing else. \
No markdown fences, no prose, no explanations before or after the JSON.";

/// Extract the contents of a markdown code fence, if present.
///
/// Supports both ```json and bare ``` fences.
pub fn extract_fenced_block(text: &str) -> Option<&str> {
    let start_marker_json = "```json";
    let start_marker_plain = "```";
    let end_marker = "```";

    let content_start = if let Some(pos) = text.find(start_marker_json) {
        pos.checked_add(start_marker_json.len())?
    } else if let Some(pos) = text.find(start_marker_plain) {
        pos.checked_add(start_marker_plain.len())?
    } else {
        return None;
    };

    let rest = text.get(content_start..)?;
    let rest = rest.strip_prefix('\n').unwrap_or(rest);

    let end_pos = rest.find(end_marker)?;
    Some(rest.get(..end_pos)?.trim())
}

/// Parse model output as JSON, tolerating markdown fences and surrounding prose.
///
/// Tries the raw text first, then a fenced block, then the first
/// brace-delimited span. Returns the parse error from the raw attempt when
/// nothing works.
pub fn parse_json_lenient(text: &str) -> Result<serde_json::Value, serde_json::Error> {
    let trimmed = text.trim();

    match serde_json::from_str(trimmed) {
        Ok(value) => return Ok(value),
        Err(raw_err) => {
            if let Some(block) = extract_fenced_block(trimmed) {
                if let Ok(value) = serde_json::from_str(block) {
                    return Ok(value);
                }
            }
            if let Some(span) = first_json_span(trimmed) {
                if let Ok(value) = serde_json::from_str(span) {
                    return Ok(value);
                }
            }
            Err(raw_err)
        }
    }
}

/// Locate the first balanced `{...}` or `[...]` span in free text.
fn first_json_span(text: &str) -> Option<&str> {
    let open = text.find(|c| c == '{' || c == '[')?;
    let opener = text.get(open..)?.chars().next()?;
    let closer = if opener == '{' { '}' } else { ']' };

    let mut depth: usize = 0;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text.char_indices().skip_while(|(i, _)| *i < open) {
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
            '"' => in_string = true,
            c if c == opener => depth = depth.saturating_add(1),
            c if c == closer => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    let end = i.checked_add(c.len_utf8())?;
                    return text.get(open..end);
                }
            }
            _ => {}
        }
    }
    None
}

/// Truncate a string for inclusion in error messages, respecting char boundaries.
pub fn truncate_for_error(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        s
    } else {
        let mut end = max_len;
        while end > 0 && !s.is_char_boundary(end) {
            end = end.saturating_sub(1);
        }
        s.get(..end).unwrap_or(s)
    }
}
