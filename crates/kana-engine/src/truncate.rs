/// Character cap applied by tools that return file or process output.
pub const TOOL_OUTPUT_MAX_CHARS: usize = 4000;

/// Byte cap applied by the executor to every tool result.
pub const MAX_RESULT_BYTES: usize = 64 * 1024;

/// Keep the first `max_chars` characters, appending a marker if anything was cut.
pub fn truncate_chars(output: &str, max_chars: usize) -> String {
    match output.char_indices().nth(max_chars) {
        None => output.to_string(),
        Some((cut, _)) => format!("{}\n... (truncated)", &output[..cut]),
    }
}

/// Truncate a tool result if it exceeds `max_bytes`.
/// Cuts at a char boundary and appends a marker showing original vs truncated size.
pub fn truncate_output(output: &str, max_bytes: usize) -> String {
    if output.len() <= max_bytes {
        return output.to_string();
    }
    let mut boundary = max_bytes;
    while !output.is_char_boundary(boundary) {
        boundary -= 1;
    }
    format!(
        "{}\n\n[truncated: {} bytes -> {} bytes]",
        &output[..boundary],
        output.len(),
        boundary
    )
}
