/// Truncate the middle of `text` so the result is at most `max_chars`
/// characters, keeping the head and tail. Returns the truncated string and,
/// when truncation occurred, the original character count.
pub fn truncate_middle(text: &str, max_chars: usize) -> (String, Option<usize>) {
    let total = text.chars().count();
    if total <= max_chars {
        return (text.to_string(), None);
    }

    let marker = format!("\n[... {} chars omitted ...]\n", total - max_chars);
    if max_chars <= marker.len() {
        let tail: String = text
            .chars()
            .skip(total.saturating_sub(max_chars))
            .collect();
        return (tail, Some(total));
    }

    let keep = max_chars - marker.chars().count();
    let head_len = keep / 2;
    let tail_len = keep - head_len;

    let head: String = text.chars().take(head_len).collect();
    let tail: String = text.chars().skip(total - tail_len).collect();
    (format!("{head}{marker}{tail}"), Some(total))
}

/// Keep at most the last `max_chars` characters of `text`.
pub fn truncate_front(text: &str, max_chars: usize) -> (String, Option<usize>) {
    let total = text.chars().count();
    if total <= max_chars {
        return (text.to_string(), None);
    }
    let tail: String = text.chars().skip(total - max_chars).collect();
    (tail, Some(total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_untouched() {
        let (out, original) = truncate_middle("hello", 100);
        assert_eq!(out, "hello");
        assert_eq!(original, None);
    }

    #[test]
    fn long_text_keeps_head_and_tail() {
        let text = "x".repeat(500) + "HEAD-MARK" + &"y".repeat(500);
        let (out, original) = truncate_middle(&text, 200);
        assert!(out.len() <= 200 + 1);
        assert_eq!(original, Some(text.chars().count()));
        assert!(out.starts_with('x'));
        assert!(out.ends_with('y'));
        assert!(out.contains("omitted"));
    }

    #[test]
    fn truncate_front_keeps_tail() {
        let (out, original) = truncate_front("abcdef", 3);
        assert_eq!(out, "def");
        assert_eq!(original, Some(6));
    }
}
