//! Fenced code block extraction from generated text.
//!
//! A line starting with three backticks and nothing else closes the innermost
//! open block; any other fence line opens one. Only the outermost fences are
//! removed, so nested blocks survive inside the extracted body. An unclosed
//! block is discarded.

const FENCE: &str = "```";

/// The longest complete top-level fenced block in `text`.
pub fn largest_code_block(text: &str) -> Option<String> {
    let mut largest: Option<(usize, String)> = None;
    let mut block: Vec<&str> = Vec::new();
    let mut depth = 0usize;

    for line in text.split('\n') {
        if let Some(rest) = line.strip_prefix(FENCE) {
            let closing = rest.trim().is_empty();
            if closing && depth > 0 {
                depth -= 1;
                if depth == 0 {
                    let body = block.join("\n");
                    let len = body.chars().count();
                    if largest.as_ref().is_none_or(|(best, _)| len > *best) {
                        largest = Some((len, body));
                    }
                    block.clear();
                    continue;
                }
            } else {
                depth += 1;
                if depth == 1 {
                    continue;
                }
            }
        }
        if depth > 0 {
            block.push(line);
        }
    }

    largest.map(|(_, body)| body)
}

/// [`largest_code_block`] over each response, empty where none was found.
pub fn extract_code<S: AsRef<str>>(responses: &[S]) -> Vec<String> {
    responses
        .iter()
        .map(|text| largest_code_block(text.as_ref()).unwrap_or_default())
        .collect()
}
