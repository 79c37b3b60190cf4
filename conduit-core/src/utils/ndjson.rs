// src/utils/ndjson.rs
use serde::Serialize;
use serde::de::DeserializeOwned;

/// One record per line, newline included.
pub fn encode_line<T: Serialize>(value: &T) -> serde_json::Result<String> {
    let mut json = serde_json::to_string(value)?;
    json.push('\n');
    Ok(json)
}

/// Decode every non-blank line. On failure returns the 1-based line number
/// with the codec error.
pub fn decode_lines<T: DeserializeOwned>(text: &str) -> Result<Vec<T>, (usize, serde_json::Error)> {
    let mut out = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value = serde_json::from_str(line).map_err(|e| (idx + 1, e))?;
        out.push(value);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn blank_lines_are_skipped() {
        let text = "{\"a\":1}\n\n{\"a\":2}\n";
        let v: Vec<Value> = decode_lines(text).unwrap();
        assert_eq!(v, vec![json!({"a":1}), json!({"a":2})]);
    }

    #[test]
    fn bad_line_reports_its_number() {
        let text = "{\"a\":1}\nnot json\n";
        let err = decode_lines::<Value>(text).unwrap_err();
        assert_eq!(err.0, 2);
    }
}
