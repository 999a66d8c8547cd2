//! Local sentence selection and splicing.

/// Replace the first verbatim occurrence of `target` in `text`.
///
/// Returns `text` unchanged when `target` is empty or absent.
pub fn splice_first(text: &str, target: &str, replacement: &str) -> String {
    if target.is_empty() || !text.contains(target) {
        return text.to_string();
    }
    text.replacen(target, replacement, 1)
}

/// The text up to and including the first period, or the whole trimmed
/// text when there is none.
pub fn first_sentence(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.find('.') {
        Some(end) => trimmed[..=end].to_string(),
        None => trimmed.to_string(),
    }
}
