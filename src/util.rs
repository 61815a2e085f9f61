//! Small text helpers shared by the command and HTTP parsers.

/// Keep only printable ASCII (`' '..='~'`); control characters, CR/LF and
/// anything non-ASCII are stripped.
pub fn sanitize(input: &str) -> String {
    input.chars().filter(|c| matches!(c, ' '..='~')).collect()
}
