pub mod logging;

/// Case/whitespace normalisation shared by the index, the matcher and the
/// target extractor. Trailing ellipses ("Save…", "Export...") are dropped
/// because menus append them to otherwise identical labels.
pub fn normalize_text(text: &str) -> String {
    let collapsed = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    let trimmed = collapsed
        .trim_end_matches('…')
        .trim_end_matches("...")
        .trim_end();

    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::normalize_text;

    #[test]
    fn collapses_whitespace_and_case() {
        assert_eq!(normalize_text("  Sign   In "), "sign in");
        assert_eq!(normalize_text("SEND\tnow"), "send now");
    }

    #[test]
    fn strips_trailing_ellipsis() {
        assert_eq!(normalize_text("Save As…"), "save as");
        assert_eq!(normalize_text("Export..."), "export");
        assert_eq!(normalize_text(""), "");
    }
}
