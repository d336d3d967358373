use crate::source::Span;

/// Maps byte offsets in a single source file to 1-based line/column pairs
/// for diagnostics. Columns count Unicode scalars, not bytes.
#[derive(Clone, Debug)]
pub struct SourceMap {
    name: String,
    src: String,
    line_starts: Vec<usize>,
}

impl SourceMap {
    pub fn new(name: impl Into<String>, src: &str) -> Self {
        Self {
            name: name.into(),
            src: src.to_string(),
            line_starts: compute_line_starts(src),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 1-based line and column of a byte offset. Offsets past the end
    /// clamp to the last position.
    pub fn line_col(&self, offset: usize) -> (usize, usize) {
        let offset = offset.min(self.src.len());
        let line_idx = self
            .line_starts
            .partition_point(|&start| start <= offset)
            .saturating_sub(1);
        let line_start = self.line_starts.get(line_idx).copied().unwrap_or(0);
        let col = match self.src.get(line_start..offset) {
            Some(prefix) => prefix.chars().count() + 1,
            None => offset.saturating_sub(line_start) + 1,
        };
        (line_idx + 1, col)
    }

    /// Renders the start of a span as `name:line:col`.
    pub fn render(&self, span: Span) -> String {
        let (line, col) = self.line_col(span.start);
        format!("{}:{}:{}", self.name, line, col)
    }
}

fn compute_line_starts(src: &str) -> Vec<usize> {
    let mut starts = vec![0];
    let bytes = src.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\n' => {
                starts.push(i + 1);
                i += 1;
            }
            b'\r' => {
                if bytes.get(i + 1) == Some(&b'\n') {
                    starts.push(i + 2);
                    i += 2;
                } else {
                    starts.push(i + 1);
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    starts
}
