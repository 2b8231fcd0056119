/// Comparison key for a variant's display color.
///
/// Normalization steps:
/// - NFKC-style width folding for fullwidth ASCII forms
/// - drop all whitespace (including NBSP) and zero-width characters
/// - drop bracketing/separator punctuation that storefronts sprinkle freely
/// - lowercase
///
/// "스페이스 그레이", "Space-Gray" and "ＳｐａｃｅＧｒａｙ\u{200B}" all reduce to
/// the same key.
pub fn color_key(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        let ch = fold_width(ch);
        if ch.is_whitespace() || is_zero_width(ch) || is_separator_noise(ch) {
            continue;
        }
        for lower in ch.to_lowercase() {
            out.push(lower);
        }
    }
    out
}

/// Map fullwidth ASCII (U+FF01..=U+FF5E) back to its halfwidth form.
fn fold_width(ch: char) -> char {
    let code = ch as u32;
    if (0xFF01..=0xFF5E).contains(&code) {
        char::from_u32(code - 0xFEE0).unwrap_or(ch)
    } else {
        ch
    }
}

fn is_zero_width(ch: char) -> bool {
    matches!(ch, '\u{200B}'..='\u{200D}' | '\u{FEFF}')
}

fn is_separator_noise(ch: char) -> bool {
    matches!(
        ch,
        '(' | ')'
            | '['
            | ']'
            | '{'
            | '}'
            | ':'
            | ';'
            | ','
            | '\''
            | '"'
            | '`'
            | '-'
            | '_'
            | '·'
            | '•'
            | '・'
            | 'ㆍ'
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_whitespace_and_zero_width() {
        assert_eq!(color_key("Space\u{200B} Gray"), "spacegray");
        assert_eq!(color_key("\u{FEFF}블랙\u{00A0}"), "블랙");
    }

    #[test]
    fn folds_fullwidth_ascii() {
        assert_eq!(color_key("Ｂｌｕｅ"), "blue");
    }

    #[test]
    fn drops_separator_punctuation() {
        assert_eq!(color_key("Navy-Blue (matte)"), "navybluematte");
        assert_eq!(color_key("레드 · 무광"), "레드무광");
    }

    #[test]
    fn equal_keys_for_noisy_duplicates() {
        assert_eq!(color_key(" ＲＥＤ "), color_key("red"));
    }
}
