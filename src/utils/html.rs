use std::collections::HashSet;

/// Reduces user supplied text to plain text.
///
/// Every tag is removed (script and style blocks together with their
/// content) so feedback renders safely in any admin client.
pub fn strip_html(input: &str) -> String {
    ammonia::Builder::empty()
        .clean_content_tags(HashSet::from(["script", "style"]))
        .clean(input)
        .to_string()
}
