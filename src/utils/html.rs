use ammonia;

/// Clean user-supplied text using the ammonia library.
///
/// Quiz titles, question and option text and display names are rendered by
/// the owner dashboard and every participant screen, so markup is reduced to
/// the whitelisted safe subset before it is stored.
pub fn clean_html(input: &str) -> String {
    ammonia::clean(input)
}

/// Like [`clean_html`], for optional fields.
pub fn clean_optional(input: Option<&str>) -> Option<String> {
    input.map(clean_html)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_is_stripped() {
        assert_eq!(clean_html("Hi<script>alert(1)</script>"), "Hi");
        assert_eq!(clean_html("<b>bold</b>"), "<b>bold</b>");
    }
}
