/// Segment kinds recognized in the model's token stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentKind {
    Think,
    Respond,
    Call,
    Execute,
    End,
}

/// A maximal run of text between two recognized delimiters.
#[derive(Clone, Debug, PartialEq)]
pub struct Segment {
    pub kind: SegmentKind,
    pub text: String,
}

#[derive(Clone, Debug)]
pub struct Delimiter {
    pub marker: String,
    pub kind: SegmentKind,
}

impl Delimiter {
    pub fn new(marker: impl Into<String>, kind: SegmentKind) -> Self {
        Self {
            marker: marker.into(),
            kind,
        }
    }
}

fn default_delimiters() -> Vec<Delimiter> {
    vec![
        Delimiter::new("§think:", SegmentKind::Think),
        Delimiter::new("§respond:", SegmentKind::Respond),
        Delimiter::new("§call:", SegmentKind::Call),
        Delimiter::new("§execute", SegmentKind::Execute),
        Delimiter::new("§end", SegmentKind::End),
    ]
}

/// Incremental protocol parser over partial string tokens.
///
/// Delimiters may split across chunks, so the parser holds back the
/// longest buffer suffix that is still a prefix of some marker. The
/// emitted segment sequence is identical for every chunking of one
/// logical stream. Text before the first delimiter becomes an implicit
/// think segment. Malformed call payloads are forwarded raw; this
/// layer never errors.
pub struct StreamParser {
    delimiters: Vec<Delimiter>,
    buffer: String,
    text: String,
    current: Option<SegmentKind>,
}

impl Default for StreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamParser {
    pub fn new() -> Self {
        Self {
            delimiters: default_delimiters(),
            buffer: String::new(),
            text: String::new(),
            current: None,
        }
    }

    /// Extend the delimiter table beyond the built-in protocol.
    pub fn with_delimiters(extra: Vec<Delimiter>) -> Self {
        let mut parser = Self::new();
        parser.delimiters.extend(extra);
        parser
    }

    /// Consume one chunk, returning the segments it completed.
    pub fn feed(&mut self, chunk: &str) -> Vec<Segment> {
        self.buffer.push_str(chunk);
        let mut out = Vec::new();

        loop {
            match self.find_delimiter() {
                Some((idx, delim_idx)) => {
                    let marker_len = self.delimiters[delim_idx].marker.len();
                    let kind = self.delimiters[delim_idx].kind;
                    self.text.push_str(&self.buffer[..idx]);
                    self.buffer.drain(..idx + marker_len);
                    if let Some(segment) = self.cut_segment() {
                        out.push(segment);
                    }
                    self.current = Some(kind);
                }
                None => {
                    let keep = self.holdback_len();
                    let consume = self.buffer.len() - keep;
                    if consume > 0 {
                        let moved: String = self.buffer.drain(..consume).collect();
                        self.text.push_str(&moved);
                    }
                    break;
                }
            }
        }
        out
    }

    /// Flush at end of stream. A leftover partial marker is plain text.
    pub fn finish(&mut self) -> Vec<Segment> {
        let rest = std::mem::take(&mut self.buffer);
        self.text.push_str(&rest);
        let mut out = Vec::new();
        if let Some(segment) = self.cut_segment() {
            out.push(segment);
        }
        self.current = None;
        out
    }

    /// Close out the segment accumulated so far. Empty text is skipped
    /// except for Execute/End, which are meaningful without content.
    fn cut_segment(&mut self) -> Option<Segment> {
        let text = std::mem::take(&mut self.text);
        let kind = self.current.unwrap_or(SegmentKind::Think);
        let trimmed = text.trim();
        if trimmed.is_empty() && !matches!(kind, SegmentKind::Execute | SegmentKind::End) {
            return None;
        }
        Some(Segment {
            kind,
            text: trimmed.to_string(),
        })
    }

    /// Earliest full delimiter occurrence in the buffer.
    fn find_delimiter(&self) -> Option<(usize, usize)> {
        let mut best: Option<(usize, usize)> = None;
        for (i, delim) in self.delimiters.iter().enumerate() {
            if let Some(idx) = self.buffer.find(&delim.marker) {
                if best.map_or(true, |(b, _)| idx < b) {
                    best = Some((idx, i));
                }
            }
        }
        best
    }

    /// Length of the longest buffer suffix that is a proper prefix of
    /// some marker — held back until the next chunk resolves it.
    fn holdback_len(&self) -> usize {
        for (start, _) in self.buffer.char_indices() {
            let suffix = &self.buffer[start..];
            if self
                .delimiters
                .iter()
                .any(|d| d.marker.len() > suffix.len() && d.marker.starts_with(suffix))
            {
                return suffix.len();
            }
        }
        0
    }
}
