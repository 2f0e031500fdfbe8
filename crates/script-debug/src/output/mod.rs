//! Captured output pipeline.
//! - vt: escape-sequence parsing into styled runs
//! - redirect: native stdout/stderr capture
//! - OutputPipeline: per-category parsers shared across threads

pub mod redirect;
pub mod vt;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::encoding::TextEncoding;
use crate::protocol::Source;

pub use self::redirect::{open_redirect, RedirectStream, StreamRedirect};
pub use self::vt::{StyledRun, VtColor, VtParser, VtTextState};

/// Category reported on `output` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputCategory {
    Console,
    Stdout,
    Stderr,
}

impl OutputCategory {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Console => "console",
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// Script location that produced a run of output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputAttribution {
    pub source: Source,
    pub line: u32,
}

/// One flushed run, ready to become an `output` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub category: OutputCategory,
    pub run: StyledRun,
    pub attribution: Option<OutputAttribution>,
}

#[derive(Debug, Default)]
struct Channel {
    parser: VtParser,
    attribution: Option<OutputAttribution>,
}

/// Thread-safe front of the output parsers.
///
/// `emit` runs while the category lock is held, so chunks for one category
/// reach the queue in stream order even with concurrent writers.
#[derive(Debug, Default)]
pub struct OutputPipeline {
    channels: Mutex<FxHashMap<OutputCategory, Channel>>,
}

impl OutputPipeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capture(
        &self,
        category: OutputCategory,
        bytes: &[u8],
        coding: TextEncoding,
        attribution: Option<OutputAttribution>,
        mut emit: impl FnMut(OutputChunk),
    ) {
        let mut channels = self.channels.lock();
        let channel = channels.entry(category).or_default();
        // A run is attributed to the call that contributed its first byte.
        if !channel.parser.has_pending() {
            channel.attribution.clone_from(&attribution);
        }
        let Channel {
            parser,
            attribution: open,
        } = channel;
        parser.feed(bytes, coding, &mut |run| {
            emit(OutputChunk {
                category,
                run,
                attribution: open.clone(),
            });
            open.clone_from(&attribution);
        });
    }

    /// Flush pending text of every category.
    pub fn flush(&self, coding: TextEncoding, mut emit: impl FnMut(OutputChunk)) {
        let mut channels = self.channels.lock();
        let mut categories = channels.keys().copied().collect::<Vec<_>>();
        categories.sort_by_key(|category| *category as u8);
        for category in categories {
            let Some(channel) = channels.get_mut(&category) else {
                continue;
            };
            let Channel {
                parser,
                attribution,
            } = channel;
            parser.flush(coding, &mut |run| {
                emit(OutputChunk {
                    category,
                    run,
                    attribution: attribution.clone(),
                });
            });
        }
    }

    /// Discard partial output and styles, e.g. when a session ends.
    pub fn reset(&self) {
        let mut channels = self.channels.lock();
        for channel in channels.values_mut() {
            channel.parser.reset();
            channel.attribution = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::{OutputAttribution, OutputCategory, OutputChunk, OutputPipeline};
    use crate::encoding::TextEncoding;
    use crate::protocol::Source;

    fn attribution(line: u32) -> OutputAttribution {
        OutputAttribution {
            source: Source {
                name: Some("a.lua".to_string()),
                path: Some("/src/a.lua".to_string()),
                source_reference: None,
            },
            line,
        }
    }

    #[test]
    fn categories_are_parsed_independently() {
        let pipeline = OutputPipeline::new();
        let mut chunks = Vec::new();
        pipeline.capture(
            OutputCategory::Stdout,
            b"\x1b[31mout",
            TextEncoding::Utf8,
            None,
            |chunk| chunks.push(chunk),
        );
        pipeline.capture(
            OutputCategory::Stderr,
            b"err\n",
            TextEncoding::Utf8,
            None,
            |chunk| chunks.push(chunk),
        );
        pipeline.flush(TextEncoding::Utf8, |chunk| chunks.push(chunk));
        let summary = chunks
            .iter()
            .map(|chunk| (chunk.category, chunk.run.text.as_str(), chunk.run.style.is_default()))
            .collect::<Vec<_>>();
        assert_eq!(
            summary,
            vec![
                (OutputCategory::Stderr, "err\n", true),
                (OutputCategory::Stdout, "out", false),
            ]
        );
    }

    #[test]
    fn run_keeps_attribution_of_its_first_byte() {
        let pipeline = OutputPipeline::new();
        let mut chunks: Vec<OutputChunk> = Vec::new();
        pipeline.capture(
            OutputCategory::Console,
            b"one ",
            TextEncoding::Utf8,
            Some(attribution(3)),
            |chunk| chunks.push(chunk),
        );
        pipeline.capture(
            OutputCategory::Console,
            b"two\nthree\n",
            TextEncoding::Utf8,
            Some(attribution(4)),
            |chunk| chunks.push(chunk),
        );
        let lines = chunks
            .iter()
            .map(|chunk| (chunk.run.text.clone(), chunk.attribution.as_ref().map(|a| a.line)))
            .collect::<Vec<_>>();
        assert_eq!(
            lines,
            vec![
                ("one two\n".to_string(), Some(3)),
                ("three\n".to_string(), Some(4)),
            ]
        );
    }

    #[test]
    fn concurrent_writers_deliver_whole_lines() {
        let pipeline = Arc::new(OutputPipeline::new());
        let (tx, rx) = crossbeam_channel::unbounded::<OutputChunk>();
        let writers = (0..4)
            .map(|index| {
                let pipeline = Arc::clone(&pipeline);
                let tx = tx.clone();
                thread::spawn(move || {
                    for round in 0..50 {
                        let line = format!("writer {index} round {round}\n");
                        pipeline.capture(
                            OutputCategory::Stdout,
                            line.as_bytes(),
                            TextEncoding::Utf8,
                            None,
                            |chunk| {
                                let _ = tx.send(chunk);
                            },
                        );
                    }
                })
            })
            .collect::<Vec<_>>();
        for writer in writers {
            writer.join().expect("writer thread");
        }
        drop(tx);
        let received = rx.iter().collect::<Vec<_>>();
        assert_eq!(received.len(), 200);
        assert!(received
            .iter()
            .all(|chunk| chunk.run.text.starts_with("writer ") && chunk.run.text.ends_with('\n')));
    }

    #[test]
    fn reset_drops_partial_sequences() {
        let pipeline = OutputPipeline::new();
        let mut chunks = Vec::new();
        pipeline.capture(
            OutputCategory::Stdout,
            b"partial\x1b[3",
            TextEncoding::Utf8,
            None,
            |chunk| chunks.push(chunk),
        );
        pipeline.reset();
        pipeline.capture(
            OutputCategory::Stdout,
            b"1mfresh\n",
            TextEncoding::Utf8,
            None,
            |chunk| chunks.push(chunk),
        );
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].run.text, "1mfresh\n");
        assert!(chunks[0].run.style.is_default());
    }
}
