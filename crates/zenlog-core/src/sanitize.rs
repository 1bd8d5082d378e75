//! Streaming removal of terminal escape sequences.
//!
//! Recognizes ESC-introduced sequences: CSI (`ESC [ ... final`), string
//! sequences (OSC, DCS, SOS, PM, APC; ended by BEL or `ESC \`), single
//! shifts (`ESC N x`, `ESC O x`) and two-byte/intermediate escapes
//! (`ESC ( B`, `ESC =`). Everything else passes through untouched,
//! including CR, LF, TAB and UTF-8 text. State survives between calls, so a
//! sequence split across two reads is still removed.

/// String sequences longer than this are assumed to be unterminated garbage
/// and stop swallowing output.
const MAX_STRING_LEN: usize = 64 * 1024;

const ESC: u8 = 0x1b;
const BEL: u8 = 0x07;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Ground,
    Escape,
    EscIntermediate,
    Csi,
    Str,
    StrEsc,
    SingleShift,
}

#[derive(Debug)]
pub struct Sanitizer {
    state: State,
    string_len: usize,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Sanitizer {
    pub fn new() -> Self {
        Self {
            state: State::Ground,
            string_len: 0,
        }
    }

    /// Forget any partially seen sequence.
    pub fn reset(&mut self) {
        self.state = State::Ground;
        self.string_len = 0;
    }

    /// Whether the sanitizer is in the middle of a sequence.
    pub fn is_pending(&self) -> bool {
        self.state != State::Ground
    }

    /// Append the sanitized form of `input` to `out`.
    pub fn feed(&mut self, input: &[u8], out: &mut Vec<u8>) {
        out.reserve(input.len());
        for &b in input {
            self.step(b, out);
        }
    }

    /// Sanitize `input` into a fresh buffer.
    pub fn sanitize(&mut self, input: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(input.len());
        self.feed(input, &mut out);
        out
    }

    fn step(&mut self, b: u8, out: &mut Vec<u8>) {
        match self.state {
            State::Ground => {
                if b == ESC {
                    self.state = State::Escape;
                } else {
                    out.push(b);
                }
            }
            State::Escape => match b {
                b'[' => self.state = State::Csi,
                b']' | b'P' | b'X' | b'^' | b'_' => {
                    self.string_len = 0;
                    self.state = State::Str;
                }
                b'N' | b'O' => self.state = State::SingleShift,
                ESC => {}
                0x20..=0x2f => self.state = State::EscIntermediate,
                0x30..=0x7e => self.state = State::Ground,
                _ => {
                    out.push(b);
                    self.state = State::Ground;
                }
            },
            State::EscIntermediate => match b {
                0x20..=0x2f => {}
                0x30..=0x7e => self.state = State::Ground,
                ESC => self.state = State::Escape,
                _ => {
                    out.push(b);
                    self.state = State::Ground;
                }
            },
            State::Csi => match b {
                0x40..=0x7e => self.state = State::Ground,
                0x20..=0x3f => {}
                ESC => self.state = State::Escape,
                // C0 controls inside a CSI are executed, not swallowed.
                0x00..=0x1f => out.push(b),
                _ => {
                    out.push(b);
                    self.state = State::Ground;
                }
            },
            State::Str => match b {
                BEL => self.state = State::Ground,
                ESC => self.state = State::StrEsc,
                _ => {
                    self.string_len += 1;
                    if self.string_len > MAX_STRING_LEN {
                        self.state = State::Ground;
                    }
                }
            },
            State::StrEsc => {
                if b == b'\\' {
                    self.state = State::Ground;
                } else {
                    // ESC followed by anything else ends the string and
                    // starts a new escape.
                    self.state = State::Escape;
                    self.step(b, out);
                }
            }
            State::SingleShift => {
                if !(0x20..=0x7e).contains(&b) {
                    out.push(b);
                }
                self.state = State::Ground;
            }
        }
    }
}

/// One-shot sanitization of a complete buffer.
pub fn sanitize(input: &[u8]) -> Vec<u8> {
    Sanitizer::new().sanitize(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_untouched() {
        let input = "a.txt\r\nb.txt\n\tüñí 日本\u{7}".as_bytes();
        assert_eq!(sanitize(input), input);
    }

    #[test]
    fn strips_colors_and_cursor_movement() {
        let input = b"\x1b[1;31mred\x1b[0m \x1b[2J\x1b[H\x1b[?25lok\x1b[K\n";
        assert_eq!(sanitize(input), b"red ok\n");
    }

    #[test]
    fn strips_osc_with_either_terminator() {
        assert_eq!(sanitize(b"\x1b]0;title\x07$ "), b"$ ");
        assert_eq!(sanitize(b"\x1b]2;title\x1b\\$ "), b"$ ");
        assert_eq!(sanitize(b"\x1bP+q544e\x1b\\x"), b"x");
    }

    #[test]
    fn strips_short_escapes() {
        assert_eq!(sanitize(b"\x1b(Bx\x1b=y\x1b>z\x1bOAw\x1b7\x1b8"), b"xyzw");
    }

    #[test]
    fn sequences_may_straddle_reads() {
        let input = b"ls\x1b[01;34mdir\x1b[0m\x1b]0;t\x1b\\done\n";
        let expected = sanitize(input);

        let mut s = Sanitizer::new();
        let mut out = Vec::new();
        for b in input.iter() {
            s.feed(std::slice::from_ref(b), &mut out);
        }
        assert_eq!(out, expected);
        assert_eq!(out, b"lsdirdone\n");
        assert!(!s.is_pending());
    }

    #[test]
    fn split_at_escape_keeps_state() {
        let mut s = Sanitizer::new();
        assert_eq!(s.sanitize(b"abc\x1b"), b"abc");
        assert!(s.is_pending());
        assert_eq!(s.sanitize(b"[32mdef"), b"def");
    }

    #[test]
    fn controls_inside_csi_are_kept() {
        assert_eq!(sanitize(b"\x1b[1\n;2mX"), b"\nX");
    }

    #[test]
    fn esc_then_control_keeps_the_control() {
        assert_eq!(sanitize(b"a\x1b\nb"), b"a\nb");
    }

    #[test]
    fn unterminated_string_eventually_releases() {
        let mut input = b"\x1b]".to_vec();
        input.extend(std::iter::repeat(b'x').take(MAX_STRING_LEN + 1));
        input.extend_from_slice(b"tail");
        assert_eq!(sanitize(&input), b"tail");
    }

    #[test]
    fn reset_drops_partial_sequence() {
        let mut s = Sanitizer::new();
        s.sanitize(b"\x1b[3");
        s.reset();
        assert_eq!(s.sanitize(b"1m"), b"1m");
    }
}
