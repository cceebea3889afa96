/// Longest identifier handed to a backend; longer names are elided in the
/// middle so both ends stay readable.
pub const MAX_IDENTIFIER_LEN: usize = 96;

const ELISION: &str = "___";

/// Escapes a logical table or column name into SQL identifier form: every
/// character that is not an ASCII letter or digit becomes `_`. Names over
/// the length cap lose a contiguous middle span, replaced by `___`; the
/// result is deterministic for the same input.
pub fn escape_identifier(name: &str) -> String {
    let escaped: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if escaped.len() <= MAX_IDENTIFIER_LEN {
        return escaped;
    }
    let keep = MAX_IDENTIFIER_LEN - ELISION.len();
    let head = keep / 2;
    let tail = keep - head;
    format!(
        "{}{ELISION}{}",
        &escaped[..head],
        &escaped[escaped.len() - tail..]
    )
}
