//! Per-module column selection and display headers.

/// Maps a module's full label set to the user-selected columns.
///
/// Widths count chars, the unit `{:<width$}` pads by.
/// Built once after the module has started. Selected columns keep the
/// module's label order, whatever order they were requested in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnProjection {
    indices: Vec<usize>,
    headers: Vec<String>,
    widths: Vec<usize>,
    unknown: Vec<String>,
}

impl ColumnProjection {
    /// `selected` empty means every column. Names that match no label are
    /// collected in [`ColumnProjection::unknown`] and otherwise ignored.
    pub fn new(labels: &[String], hints: &[usize], selected: &[String], prefix: &str) -> Self {
        let indices: Vec<usize> = if selected.is_empty() {
            (0..labels.len()).collect()
        } else {
            labels
                .iter()
                .enumerate()
                .filter(|(_, label)| selected.contains(label))
                .map(|(idx, _)| idx)
                .collect()
        };

        let mut unknown: Vec<String> = Vec::new();
        for name in selected {
            if !labels.contains(name) && !unknown.contains(name) {
                unknown.push(name.clone());
            }
        }

        let headers: Vec<String> = indices
            .iter()
            .map(|&idx| format!("{}{}", prefix, labels[idx]))
            .collect();
        let widths = indices
            .iter()
            .zip(&headers)
            .map(|(&idx, header)| {
                header
                    .chars()
                    .count()
                    .max(hints.get(idx).copied().unwrap_or(0))
                    + 1
            })
            .collect();

        Self {
            indices,
            headers,
            widths,
            unknown,
        }
    }

    /// Indices into the module's rows, ascending.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Prefixed column names, e.g. `0:time`.
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn widths(&self) -> &[usize] {
        &self.widths
    }

    pub fn unknown(&self) -> &[String] {
        &self.unknown
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Selected fields of `row`; a field the row lacks becomes empty.
    pub fn project(&self, row: &[String]) -> Vec<String> {
        self.indices
            .iter()
            .map(|&idx| row.get(idx).cloned().unwrap_or_default())
            .collect()
    }

    pub fn empties(&self) -> Vec<String> {
        vec![String::new(); self.indices.len()]
    }
}
