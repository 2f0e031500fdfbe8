//! Incremental VT escape-sequence parser.
//! - VtTextState: open style attributes
//! - VtParser: byte-at-a-time state machine producing styled runs

use serde_json::{json, Map, Value};

use crate::encoding::TextEncoding;

/// Pending text is flushed once it reaches this many bytes.
pub const FLUSH_THRESHOLD: usize = 4096;

const MAX_PARAMS: usize = 64;
const ESC: u8 = 0x1B;

/// The eight base terminal colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VtColor {
    Black,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
}

impl VtColor {
    fn from_index(index: u16) -> Option<Self> {
        Some(match index {
            0 => Self::Black,
            1 => Self::Red,
            2 => Self::Green,
            3 => Self::Yellow,
            4 => Self::Blue,
            5 => Self::Magenta,
            6 => Self::Cyan,
            7 => Self::White,
            _ => return None,
        })
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Black => "black",
            Self::Red => "red",
            Self::Green => "green",
            Self::Yellow => "yellow",
            Self::Blue => "blue",
            Self::Magenta => "magenta",
            Self::Cyan => "cyan",
            Self::White => "white",
        }
    }
}

/// Style attributes in effect for a run of text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VtTextState {
    pub foreground: Option<VtColor>,
    pub background: Option<VtColor>,
    pub bright: bool,
    pub underline: bool,
    pub negative: bool,
}

impl VtTextState {
    #[must_use]
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    /// JSON form attached to output events; `None` for unstyled text.
    #[must_use]
    pub fn to_json(&self) -> Option<Value> {
        if self.is_default() {
            return None;
        }
        let mut style = Map::new();
        if let Some(color) = self.foreground {
            style.insert("foreground".to_string(), json!(color.as_str()));
        }
        if let Some(color) = self.background {
            style.insert("background".to_string(), json!(color.as_str()));
        }
        if self.bright {
            style.insert("bright".to_string(), json!(true));
        }
        if self.underline {
            style.insert("underline".to_string(), json!(true));
        }
        if self.negative {
            style.insert("negative".to_string(), json!(true));
        }
        Some(json!({ "style": style }))
    }

    fn apply_sgr(&mut self, params: &[u16]) {
        if params.is_empty() {
            *self = Self::default();
            return;
        }
        for &param in params {
            match param {
                0 => *self = Self::default(),
                1 => self.bright = true,
                4 => self.underline = true,
                7 => self.negative = true,
                22 => self.bright = false,
                24 => self.underline = false,
                27 => self.negative = false,
                30..=37 => self.foreground = VtColor::from_index(param - 30),
                39 => self.foreground = None,
                40..=47 => self.background = VtColor::from_index(param - 40),
                49 => self.background = None,
                90..=97 => {
                    self.foreground = VtColor::from_index(param - 90);
                    self.bright = true;
                }
                100..=107 => self.background = VtColor::from_index(param - 100),
                _ => {}
            }
        }
    }
}

/// A flushed run of text with a single style.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyledRun {
    pub text: String,
    pub style: VtTextState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    Ground,
    Escape,
    Csi,
}

/// Escape-sequence parser for one output stream.
///
/// Partial sequences and partial characters stay buffered between calls, so
/// the emitted runs do not depend on how the stream was chunked.
#[derive(Debug, Clone)]
pub struct VtParser {
    state: ParseState,
    params: Vec<u16>,
    current: Option<u16>,
    style: VtTextState,
    pending: Vec<u8>,
    threshold: usize,
}

impl Default for VtParser {
    fn default() -> Self {
        Self::new()
    }
}

impl VtParser {
    #[must_use]
    pub fn new() -> Self {
        Self::with_threshold(FLUSH_THRESHOLD)
    }

    #[must_use]
    pub fn with_threshold(threshold: usize) -> Self {
        Self {
            state: ParseState::Ground,
            params: Vec::new(),
            current: None,
            style: VtTextState::default(),
            pending: Vec::new(),
            threshold: threshold.max(1),
        }
    }

    #[must_use]
    pub fn style(&self) -> VtTextState {
        self.style
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn feed(&mut self, bytes: &[u8], coding: TextEncoding, emit: &mut impl FnMut(StyledRun)) {
        for &byte in bytes {
            match self.state {
                ParseState::Ground => self.ground(byte, coding, emit),
                ParseState::Escape => {
                    if byte == b'[' {
                        self.params.clear();
                        self.current = None;
                        self.state = ParseState::Csi;
                    } else {
                        // Non-CSI escapes carry no style; drop them.
                        self.state = ParseState::Ground;
                    }
                }
                ParseState::Csi => self.csi(byte, coding, emit),
            }
        }
    }

    /// Emit any pending text with the current style.
    pub fn flush(&mut self, coding: TextEncoding, emit: &mut impl FnMut(StyledRun)) {
        if self.pending.is_empty() {
            return;
        }
        let text = coding.decode(&self.pending).into_owned();
        self.pending.clear();
        emit(StyledRun {
            text,
            style: self.style,
        });
    }

    /// Drop pending text and any partial sequence, restoring default style.
    pub fn reset(&mut self) {
        self.state = ParseState::Ground;
        self.params.clear();
        self.current = None;
        self.style = VtTextState::default();
        self.pending.clear();
    }

    fn ground(&mut self, byte: u8, coding: TextEncoding, emit: &mut impl FnMut(StyledRun)) {
        match byte {
            ESC => self.state = ParseState::Escape,
            b'\n' => {
                self.pending.push(byte);
                self.flush(coding, emit);
            }
            _ => {
                // Only split on a character start so a run never ends mid-character.
                if self.pending.len() >= self.threshold && byte & 0xC0 != 0x80 {
                    self.flush(coding, emit);
                }
                self.pending.push(byte);
            }
        }
    }

    fn csi(&mut self, byte: u8, coding: TextEncoding, emit: &mut impl FnMut(StyledRun)) {
        match byte {
            b'0'..=b'9' => {
                let digit = u16::from(byte - b'0');
                let value = self.current.unwrap_or(0);
                self.current = Some(value.saturating_mul(10).saturating_add(digit));
            }
            b';' => self.push_param(),
            0x40..=0x7E => {
                self.push_param();
                self.state = ParseState::Ground;
                if byte == b'm' {
                    let params = std::mem::take(&mut self.params);
                    self.select_graphic_rendition(&params, coding, emit);
                }
                self.params.clear();
            }
            // Intermediates, private markers and stray controls are ignored.
            _ => {}
        }
    }

    fn push_param(&mut self) {
        let value = self.current.take().unwrap_or(0);
        if self.params.len() < MAX_PARAMS {
            self.params.push(value);
        }
    }

    fn select_graphic_rendition(
        &mut self,
        params: &[u16],
        coding: TextEncoding,
        emit: &mut impl FnMut(StyledRun),
    ) {
        let resets = params.iter().all(|param| *param == 0);
        let mut next = self.style;
        next.apply_sgr(params);
        if resets || next != self.style {
            self.flush(coding, emit);
        }
        self.style = next;
    }
}

#[cfg(test)]
mod tests {
    use std::fmt::Write as _;

    use expect_test::expect;

    use super::{StyledRun, VtParser, VtTextState};
    use crate::encoding::TextEncoding;

    fn describe(style: &VtTextState) -> String {
        let mut parts = Vec::new();
        if let Some(color) = style.foreground {
            parts.push(format!("fg={}", color.as_str()));
        }
        if let Some(color) = style.background {
            parts.push(format!("bg={}", color.as_str()));
        }
        if style.bright {
            parts.push("bright".to_string());
        }
        if style.underline {
            parts.push("underline".to_string());
        }
        if style.negative {
            parts.push("negative".to_string());
        }
        if parts.is_empty() {
            "plain".to_string()
        } else {
            parts.join(" ")
        }
    }

    fn render(runs: &[StyledRun]) -> String {
        let mut out = String::new();
        for run in runs {
            let _ = writeln!(out, "{:?} {}", run.text, describe(&run.style));
        }
        out
    }

    fn feed_chunks(chunks: &[&[u8]], threshold: usize) -> Vec<StyledRun> {
        let mut parser = VtParser::with_threshold(threshold);
        let mut runs = Vec::new();
        for chunk in chunks {
            parser.feed(chunk, TextEncoding::Utf8, &mut |run| runs.push(run));
        }
        runs
    }

    #[test]
    fn styles_split_runs() {
        let stream: &[u8] =
            b"plain \x1b[31mred\x1b[0m done\n\x1b[1;4;44mbold\nnext\x1b[m";
        let runs = feed_chunks(&[stream], 4096);
        expect![[r#"
"plain " plain
"red" fg=red
" done\n" plain
"bold\n" bg=blue bright underline
"next" bg=blue bright underline
"#]]
        .assert_eq(&render(&runs));
    }

    #[test]
    fn non_sgr_sequences_are_dropped() {
        let runs = feed_chunks(&[b"a\x1b[2Kb\x1b[?25lc\x1b7d\n".as_slice()], 4096);
        expect![[r#"
"abcd\n" plain
"#]]
        .assert_eq(&render(&runs));
    }

    #[test]
    fn bright_colors_and_attribute_resets() {
        let runs = feed_chunks(&[b"\x1b[92;7mx\x1b[27;22;39my\x1b[4mz\n".as_slice()], 4096);
        expect![[r#"
"x" fg=green bright negative
"y" plain
"z\n" underline
"#]]
        .assert_eq(&render(&runs));
    }

    #[test]
    fn pending_text_waits_for_flush() {
        let mut parser = VtParser::new();
        let mut runs = Vec::new();
        parser.feed(b"no newline\x1b[3", TextEncoding::Utf8, &mut |run| runs.push(run));
        assert!(runs.is_empty());
        assert!(parser.has_pending());
        parser.feed(b"3mafter", TextEncoding::Utf8, &mut |run| runs.push(run));
        parser.flush(TextEncoding::Utf8, &mut |run| runs.push(run));
        expect![[r#"
"no newline" plain
"after" fg=yellow
"#]]
        .assert_eq(&render(&runs));
    }

    #[test]
    fn chunking_never_changes_the_runs() {
        let stream = "h\u{e9}llo \x1b[31mw\u{f6}rld\x1b[0m\nlong line of text \x1b[1;3".to_string()
            + "4mstyled \u{2603} snow\x1b[m tail\n";
        let bytes = stream.as_bytes();
        for threshold in [4, 7, 4096] {
            let whole = feed_chunks(&[bytes], threshold);
            for first in 0..=bytes.len() {
                let split = feed_chunks(&[&bytes[..first], &bytes[first..]], threshold);
                assert_eq!(split, whole, "split at {first} threshold {threshold}");
            }
            for step in [1, 2, 3, 5] {
                let chunks = bytes.chunks(step).collect::<Vec<_>>();
                assert_eq!(feed_chunks(&chunks, threshold), whole, "step {step}");
            }
            assert!(whole.iter().all(|run| !run.text.contains('\u{fffd}')));
        }
    }

    #[test]
    fn threshold_flushes_long_lines() {
        let runs = feed_chunks(&[b"abcdefghij\n".as_slice()], 4);
        expect![[r#"
"abcd" plain
"efgh" plain
"ij\n" plain
"#]]
        .assert_eq(&render(&runs));
    }

    #[test]
    fn style_json_lists_active_attributes() {
        let style = VtTextState {
            foreground: Some(super::VtColor::Cyan),
            underline: true,
            ..VtTextState::default()
        };
        assert_eq!(
            style.to_json(),
            Some(serde_json::json!({"style": {"foreground": "cyan", "underline": true}}))
        );
        assert!(VtTextState::default().to_json().is_none());
    }
}
