//! Terminal output sanitizer for PTY transports.
//!
//! PTY output interleaves the child's text with terminal control traffic:
//! CSI cursor movement, OSC title updates, focus reports, charset selects.
//! None of that is useful to a model reading a session, so reads see a
//! cleaned stream: CRLF becomes LF, escape sequences are stripped, and
//! control bytes other than tab and newline are dropped.

const MAX_CARRY_BYTES: usize = 8192;

/// Incremental sanitizer. Escape sequences and UTF-8 code points can split
/// across read chunks; the carry buffers hold the unfinished tail until the
/// next chunk arrives.
#[derive(Debug, Default)]
pub struct OutputSanitizer {
    utf8_carry: Vec<u8>,
    text_carry: String,
}

impl OutputSanitizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning the sanitized text that is complete so far.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.utf8_carry.extend_from_slice(bytes);
        let decoded = take_complete_utf8(&mut self.utf8_carry);

        let mut input = std::mem::take(&mut self.text_carry);
        input.push_str(&decoded);
        let (clean, carry) = sanitize_chunk(&input);
        // An unterminated OSC could otherwise grow the carry forever.
        self.text_carry = if carry.len() > MAX_CARRY_BYTES {
            String::new()
        } else {
            carry
        };
        clean
    }

    /// Flush whatever is still held back (used when the stream closes).
    pub fn finish(&mut self) -> String {
        let mut input = std::mem::take(&mut self.text_carry);
        input.push_str(&String::from_utf8_lossy(&std::mem::take(
            &mut self.utf8_carry,
        )));
        flush_chunk(&input)
    }
}

/// Streaming UTF-8 decode for pipe transports (no escape stripping): feeds
/// `bytes` through `carry`, returning the complete prefix.
pub(crate) fn decode_utf8_stream(carry: &mut Vec<u8>, bytes: &[u8]) -> String {
    carry.extend_from_slice(bytes);
    take_complete_utf8(carry)
}

/// Splits the longest valid UTF-8 prefix off `buf`, leaving at most one
/// incomplete code point behind.
fn take_complete_utf8(buf: &mut Vec<u8>) -> String {
    match std::str::from_utf8(buf) {
        Ok(all) => {
            let out = all.to_string();
            buf.clear();
            out
        }
        Err(err) => {
            let valid = err.valid_up_to();
            let rest = buf.split_off(valid);
            let mut out = String::from_utf8_lossy(buf).into_owned();
            buf.clear();
            if err.error_len().is_none() && rest.len() <= 4 {
                // Incomplete trailing code point: wait for the next chunk.
                *buf = rest;
            } else {
                // Truly invalid bytes: decode lossily rather than stall.
                out.push_str(&String::from_utf8_lossy(&rest));
            }
            out
        }
    }
}

/// Sanitize a complete string (no carry handling).
pub fn sanitize_text(input: &str) -> String {
    flush_chunk(input)
}

/// Sanitize with nothing more coming: a trailing CR becomes a line break
/// and an unfinished escape sequence is dropped.
fn flush_chunk(input: &str) -> String {
    let (mut clean, carry) = sanitize_chunk(input);
    if carry == "\r" {
        clean.push('\n');
    }
    clean
}

/// Core scanner: returns sanitized output plus the unfinished tail (an
/// incomplete escape sequence or a CR that may be half of a CRLF).
fn sanitize_chunk(input: &str) -> (String, String) {
    let mut out = String::with_capacity(input.len());
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        match ch {
            '\u{1b}' => match consume_escape(&chars, i) {
                EscapeScan::Complete(next) => i = next,
                EscapeScan::Incomplete => {
                    let carry: String = chars[i..].iter().collect();
                    return (out, carry);
                }
            },
            '\r' => {
                if i + 1 < chars.len() {
                    if chars[i + 1] == '\n' {
                        out.push('\n');
                        i += 2;
                    } else {
                        // Lone CR: the child is overwriting the line; keep
                        // the break so successive frames stay readable.
                        out.push('\n');
                        i += 1;
                    }
                } else {
                    // Might be the first half of a CRLF split across chunks.
                    return (out, "\r".to_string());
                }
            }
            '\t' | '\n' => {
                out.push(ch);
                i += 1;
            }
            c if (c as u32) < 0x20 || c == '\u{7f}' => {
                i += 1;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }

    (out, String::new())
}

enum EscapeScan {
    /// Index just past the sequence.
    Complete(usize),
    Incomplete,
}

fn consume_escape(chars: &[char], esc: usize) -> EscapeScan {
    let Some(&kind) = chars.get(esc + 1) else {
        return EscapeScan::Incomplete;
    };
    match kind {
        // CSI: parameters 0x30-0x3F, intermediates 0x20-0x2F, one final
        // byte 0x40-0x7E. Covers cursor movement, SGR colors, and the
        // focus-report noise (`ESC [ I` / `ESC [ O`).
        '[' => {
            let mut i = esc + 2;
            while i < chars.len() {
                let c = chars[i] as u32;
                if (0x30..=0x3f).contains(&c) || (0x20..=0x2f).contains(&c) {
                    i += 1;
                } else if (0x40..=0x7e).contains(&c) {
                    return EscapeScan::Complete(i + 1);
                } else {
                    // Malformed sequence: drop the ESC and re-scan.
                    return EscapeScan::Complete(esc + 1);
                }
            }
            EscapeScan::Incomplete
        }
        // OSC: terminated by BEL or ST (ESC \).
        ']' => {
            let mut i = esc + 2;
            while i < chars.len() {
                match chars[i] {
                    '\u{7}' => return EscapeScan::Complete(i + 1),
                    '\u{1b}' => {
                        if let Some(&next) = chars.get(i + 1) {
                            if next == '\\' {
                                return EscapeScan::Complete(i + 2);
                            }
                            i += 1;
                        } else {
                            return EscapeScan::Incomplete;
                        }
                    }
                    _ => i += 1,
                }
            }
            EscapeScan::Incomplete
        }
        // Charset selection takes one more byte.
        '(' | ')' | '#' => {
            if chars.len() > esc + 2 {
                EscapeScan::Complete(esc + 3)
            } else {
                EscapeScan::Incomplete
            }
        }
        // Any other two-byte escape.
        _ => EscapeScan::Complete(esc + 2),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn crlf_becomes_lf() {
        assert_eq!(sanitize_text("one\r\ntwo\r\n"), "one\ntwo\n");
    }

    #[test]
    fn csi_sequences_are_stripped() {
        assert_eq!(
            sanitize_text("\u{1b}[31mred\u{1b}[0m plain"),
            "red plain"
        );
        assert_eq!(sanitize_text("\u{1b}[2J\u{1b}[Hcleared"), "cleared");
    }

    #[test]
    fn osc_sequences_are_stripped() {
        assert_eq!(sanitize_text("\u{1b}]0;title\u{7}body"), "body");
        assert_eq!(sanitize_text("\u{1b}]8;;http://x\u{1b}\\link"), "link");
    }

    #[test]
    fn focus_reports_are_removed() {
        assert_eq!(sanitize_text("\u{1b}[Iinside\u{1b}[O"), "inside");
    }

    #[test]
    fn control_bytes_keep_only_tab_and_newline() {
        assert_eq!(sanitize_text("a\u{7}b\tc\nd\u{0}e"), "ab\tc\nde");
    }

    #[test]
    fn split_escape_sequence_carries_across_chunks() {
        let mut sanitizer = OutputSanitizer::new();
        let first = sanitizer.push(b"before\x1b[3");
        let second = sanitizer.push(b"1mafter");
        assert_eq!(first, "before");
        assert_eq!(second, "after");
    }

    #[test]
    fn split_crlf_carries_across_chunks() {
        let mut sanitizer = OutputSanitizer::new();
        let first = sanitizer.push(b"line\r");
        let second = sanitizer.push(b"\nnext");
        assert_eq!(format!("{first}{second}"), "line\nnext");
    }

    #[test]
    fn split_utf8_code_point_carries_across_chunks() {
        let mut sanitizer = OutputSanitizer::new();
        let bytes = "héllo".as_bytes();
        let first = sanitizer.push(&bytes[..2]);
        let second = sanitizer.push(&bytes[2..]);
        assert_eq!(format!("{first}{second}"), "héllo");
    }

    #[test]
    fn finish_flushes_lone_carriage_return() {
        let mut sanitizer = OutputSanitizer::new();
        let first = sanitizer.push(b"tail\r");
        let rest = sanitizer.finish();
        assert_eq!(format!("{first}{rest}"), "tail\n");
    }
}
