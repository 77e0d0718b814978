//! テキスト処理ユーティリティ。

/// 先頭から最大 `max_chars` 文字を取り出す（文字境界を保証）。
#[must_use]
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// LLM出力の前後の空白と引用符を取り除く。
#[must_use]
pub fn strip_quotes(text: &str) -> &str {
    text.trim().trim_matches('"').trim_matches('\'').trim()
}

/// マークアップとして扱える文字列かどうか（先頭が開きタグ）。
#[must_use]
pub fn looks_like_markup(text: &str) -> bool {
    text.trim_start().starts_with('<')
}

/// ログ用に長いメッセージを切り詰める。
#[must_use]
pub fn preview(text: &str, max_chars: usize) -> String {
    let char_count = text.chars().count();
    if char_count <= max_chars {
        return text.to_string();
    }
    format!("{}... ({char_count} chars)", truncate_chars(text, max_chars))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("こんにちは世界", 5), "こんにちは");
        assert_eq!(truncate_chars("short", 500), "short");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn strip_quotes_removes_wrapping_quotes() {
        assert_eq!(strip_quotes("  \"Big news today.\"\n"), "Big news today.");
        assert_eq!(strip_quotes("'single'"), "single");
        assert_eq!(strip_quotes("no quotes"), "no quotes");
    }

    #[test]
    fn markup_detection_ignores_leading_whitespace() {
        assert!(looks_like_markup("\n  <html><body></body></html>"));
        assert!(!looks_like_markup("Hello there"));
    }

    #[test]
    fn preview_appends_length_when_truncated() {
        assert_eq!(preview("abcdef", 3), "abc... (6 chars)");
        assert_eq!(preview("abc", 3), "abc");
    }
}
