//! Index files
//!
//! An index is newline-separated UTF-8 text listing chunk file names in
//! playback order, relative to the index file's own directory. Blank lines are
//! ignored; there is no header.

/// Directory part of an index locator (`"a/b/index.txt"` -> `"a/b"`)
pub fn index_base_path(locator: &str) -> &str {
    match locator.rfind('/') {
        Some(pos) => &locator[..pos],
        None => "",
    }
}

/// Resolve every non-blank line of `text` to `base_path + "/" + trimmed_line`
pub fn parse_index(base_path: &str, text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            if base_path.is_empty() {
                line.to_string()
            } else {
                format!("{}/{}", base_path, line)
            }
        })
        .collect()
}
