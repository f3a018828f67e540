//! Helpers for turning raw runner output into text fragments.
//!
//! [`Utf8ChunkDecoder`] reassembles UTF-8 sequences split across reads, and
//! [`StopSequenceFilter`] cuts a fragment stream at the first stop sequence,
//! including sequences that straddle fragment boundaries.

/// Incremental decoder for byte chunks that may split multi-byte characters.
#[derive(Debug, Default, Clone)]
pub struct Utf8ChunkDecoder {
    pending: Vec<u8>,
}

impl Utf8ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode as much of `pending + bytes` as forms complete characters.
    /// Invalid sequences are replaced with U+FFFD.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    // valid_up_to guarantees this prefix is UTF-8
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                        None => {
                            // Incomplete trailing sequence, wait for more bytes.
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }

        out
    }

    /// Flush whatever is left, lossily.
    pub fn finish(&mut self) -> String {
        let out = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        out
    }
}

/// Result of feeding a fragment through a [`StopSequenceFilter`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filtered {
    /// Text safe to emit; generation continues
    Continue(String),
    /// Text before the stop sequence; generation must end
    Stop(String),
}

/// Truncates generated text at the first configured stop sequence.
#[derive(Debug, Clone)]
pub struct StopSequenceFilter {
    stops: Vec<String>,
    held: String,
    stopped: bool,
}

impl StopSequenceFilter {
    pub fn new(stops: &[String]) -> Self {
        Self {
            stops: stops.iter().filter(|s| !s.is_empty()).cloned().collect(),
            held: String::new(),
            stopped: false,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn push(&mut self, fragment: &str) -> Filtered {
        if self.stopped {
            return Filtered::Stop(String::new());
        }
        self.held.push_str(fragment);

        let first_stop = self
            .stops
            .iter()
            .filter_map(|s| self.held.find(s.as_str()))
            .min();
        if let Some(idx) = first_stop {
            self.stopped = true;
            let out = self.held[..idx].to_string();
            self.held.clear();
            return Filtered::Stop(out);
        }

        // Hold back a suffix that could still grow into a stop sequence.
        let hold = self
            .stops
            .iter()
            .map(|s| partial_suffix_len(&self.held, s))
            .max()
            .unwrap_or(0);
        let emit_to = self.held.len() - hold;
        let out = self.held[..emit_to].to_string();
        self.held.drain(..emit_to);
        Filtered::Continue(out)
    }

    /// Release held text at end of stream.
    pub fn finish(&mut self) -> String {
        std::mem::take(&mut self.held)
    }
}

/// Length of the longest proper prefix of `stop` that `text` ends with.
fn partial_suffix_len(text: &str, stop: &str) -> usize {
    (1..stop.len())
        .rev()
        .filter(|k| stop.is_char_boundary(*k))
        .find(|k| text.ends_with(&stop[..*k]))
        .unwrap_or(0)
}
