//! Common utility functions used across the codebase.

use serde_json::Value;

/// Truncates a string to at most `max_chars` characters, adding "..." if truncated.
///
/// UTF-8 safe: respects character boundaries, so multi-byte characters
/// never cause a panic.
pub fn truncate_str(s: &str, max_chars: usize) -> String {
    // Fast path: byte length is an upper bound on char count.
    if s.len() <= max_chars {
        return s.to_string();
    }
    let char_count = s.chars().count();
    if char_count <= max_chars {
        return s.to_string();
    }

    let suffix = "...";
    let suffix_len = suffix.chars().count();
    if max_chars <= suffix_len {
        return suffix.chars().take(max_chars).collect();
    }
    let truncated: String = s.chars().take(max_chars - suffix_len).collect();
    format!("{}{}", truncated, suffix)
}

/// Defensively extract a JSON object from model output.
///
/// The fallback service is not guaranteed to return pure JSON: responses
/// arrive with prose prefixes, code fences, or trailing commentary. Strips
/// fences, then scans from the first `{` for the matching close brace
/// (string- and escape-aware) and parses that slice.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let stripped = strip_code_fences(text);

    // Cheapest case first: the whole thing parses.
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(stripped.trim()) {
        return Some(value);
    }

    let bytes = stripped.as_bytes();
    let start = stripped.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &stripped[start..=i];
                    return match serde_json::from_str::<Value>(candidate) {
                        Ok(value @ Value::Object(_)) => Some(value),
                        _ => None,
                    };
                }
            }
            _ => {}
        }
    }
    None
}

fn strip_code_fences(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}
