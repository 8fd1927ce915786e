//! Line assembly for the raw debug byte stream.

use heapless::Vec as HeaplessVec;

use super::{DebugRecord, decode_line};

/// Default longest line kept; the full eight-field line is about 110 bytes.
pub const LINE_CAPACITY: usize = 256;

/// Collects serial chunks into complete `\n`-terminated lines.
///
/// The unterminated tail stays buffered for the next chunk. Non-ASCII bytes
/// are dropped. A line longer than `N` is discarded up to its terminator and
/// counted as an overflow.
#[derive(Debug)]
pub struct LineAssembler<const N: usize = LINE_CAPACITY> {
    buffer: HeaplessVec<u8, N>,
    discarding: bool,
    overflows: u32,
    dropped_bytes: u32,
}

impl<const N: usize> LineAssembler<N> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffer: HeaplessVec::new(),
            discarding: false,
            overflows: 0,
            dropped_bytes: 0,
        }
    }

    /// Appends `chunk`, calling `on_line` for every completed line.
    ///
    /// Returns the number of lines delivered.
    pub fn push<F>(&mut self, chunk: &[u8], mut on_line: F) -> usize
    where
        F: FnMut(&str),
    {
        let mut delivered = 0;

        for &byte in chunk {
            if byte == b'\n' {
                if self.discarding {
                    self.discarding = false;
                } else if let Ok(line) = core::str::from_utf8(&self.buffer) {
                    on_line(line.trim_end_matches('\r'));
                    delivered += 1;
                }
                self.buffer.clear();
                continue;
            }

            if !byte.is_ascii() {
                self.dropped_bytes = self.dropped_bytes.saturating_add(1);
                continue;
            }

            if self.discarding {
                continue;
            }

            if self.buffer.push(byte).is_err() {
                log::debug!("debug line exceeded {N} bytes; discarding");
                self.overflows = self.overflows.saturating_add(1);
                self.buffer.clear();
                self.discarding = true;
            }
        }

        delivered
    }

    /// Bytes of the unterminated line buffered so far.
    #[must_use]
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Number of lines discarded for exceeding the buffer.
    #[must_use]
    pub const fn overflows(&self) -> u32 {
        self.overflows
    }

    /// Number of non-ASCII bytes dropped.
    #[must_use]
    pub const fn dropped_bytes(&self) -> u32 {
        self.dropped_bytes
    }

    /// Drops any partial line, e.g. after reconnecting.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.discarding = false;
    }
}

impl<const N: usize> Default for LineAssembler<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters kept by [`DebugStream`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct StreamCounters {
    /// Non-empty lines seen.
    pub lines: u32,
    /// Lines that produced a record.
    pub records: u32,
    /// Lines no pattern matched.
    pub unmatched: u32,
}

/// Assembler plus decoder: raw chunks in, [`DebugRecord`]s out.
#[derive(Debug, Default)]
pub struct DebugStream<const N: usize = LINE_CAPACITY> {
    assembler: LineAssembler<N>,
    counters: StreamCounters,
}

impl<const N: usize> DebugStream<N> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            assembler: LineAssembler::new(),
            counters: StreamCounters {
                lines: 0,
                records: 0,
                unmatched: 0,
            },
        }
    }

    /// Feeds a chunk and hands every decoded record to `on_record`.
    pub fn feed<F>(&mut self, chunk: &[u8], mut on_record: F)
    where
        F: FnMut(DebugRecord),
    {
        let counters = &mut self.counters;
        self.assembler.push(chunk, |line| {
            if line.trim().is_empty() {
                return;
            }
            counters.lines = counters.lines.saturating_add(1);
            match decode_line(line) {
                Some(record) => {
                    counters.records = counters.records.saturating_add(1);
                    on_record(record);
                }
                None => counters.unmatched = counters.unmatched.saturating_add(1),
            }
        });
    }

    #[must_use]
    pub const fn counters(&self) -> StreamCounters {
        self.counters
    }

    #[must_use]
    pub const fn assembler(&self) -> &LineAssembler<N> {
        &self.assembler
    }
}
