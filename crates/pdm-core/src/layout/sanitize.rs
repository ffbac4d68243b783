//! Portable filename sanitization.

/// Longest file name accepted by common Linux filesystems (NAME_MAX), in bytes.
const NAME_MAX: usize = 255;

fn is_forbidden(c: char) -> bool {
    c.is_control() || matches!(c, '/' | '\\' | '<' | '>' | ':' | '"' | '|' | '?' | '*')
}

/// Sanitizes a remote name so it can be used as a file name on Linux and Windows.
///
/// Path separators, control characters and Windows-reserved characters become
/// `_` (runs collapse to one), surrounding whitespace, dots and underscores are
/// trimmed, and the result is cut to 255 bytes on a char boundary. May return
/// an empty string.
pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_underscore = false;

    for c in name.chars() {
        let replacement = if is_forbidden(c) { '_' } else { c };
        if replacement == '_' {
            if !prev_underscore {
                out.push('_');
            }
            prev_underscore = true;
        } else {
            out.push(replacement);
            prev_underscore = false;
        }
    }

    let trimmed = out.trim_matches(|c: char| c.is_whitespace() || c == '.' || c == '_');

    if trimmed.len() > NAME_MAX {
        let mut take = NAME_MAX;
        while take > 0 && !trimmed.is_char_boundary(take) {
            take -= 1;
        }
        trimmed[..take].to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_separators_and_reserved() {
        assert_eq!(sanitize_filename("a/b\\c:d*e?.jpg"), "a_b_c_d_e_.jpg");
        assert_eq!(sanitize_filename("say \"hi\" <3"), "say _hi_ _3");
    }

    #[test]
    fn keeps_inner_spaces_and_trims_edges() {
        assert_eq!(sanitize_filename("  ..  my photo.png  ..  "), "my photo.png");
    }

    #[test]
    fn collapses_underscores_and_controls() {
        assert_eq!(sanitize_filename("file___name\x00\x01x"), "file_name_x");
    }

    #[test]
    fn truncates_on_char_boundary() {
        let long = "é".repeat(200);
        let out = sanitize_filename(&long);
        assert!(out.len() <= 255);
        assert!(out.chars().all(|c| c == 'é'));
    }
}
