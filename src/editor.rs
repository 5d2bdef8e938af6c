//! Boundary to the editing surface.
//!
//! The core only reads buffer text and breakpoints and writes line
//! highlights back. [`InMemoryEditor`] is a shared, lock-protected
//! implementation for hosts without a real editor and for tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// One open buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditorBuffer {
    pub file_path: Option<String>,
    pub source_text: String,
    /// 1-based line numbers.
    pub breakpoint_lines: BTreeSet<usize>,
    /// 1-based inclusive ranges.
    pub highlighted_line_ranges: Vec<(usize, usize)>,
}

impl EditorBuffer {
    pub fn new(source_text: impl Into<String>) -> Self {
        Self {
            source_text: source_text.into(),
            ..Self::default()
        }
    }

    pub fn at(mut self, file_path: impl Into<String>) -> Self {
        self.file_path = Some(file_path.into());
        self
    }

    pub fn with_breakpoints(mut self, lines: impl IntoIterator<Item = usize>) -> Self {
        self.breakpoint_lines.extend(lines);
        self
    }
}

/// Editing surface of one workspace.
pub trait EditorSurface: Send + Sync {
    /// The buffer the user is looking at.
    fn active_buffer(&self) -> Option<EditorBuffer>;

    /// Every buffer whose path lies under `root`.
    fn buffers(&self, root: &str) -> Vec<EditorBuffer>;

    /// Replace the highlights of the buffer at `file_path` (the active buffer
    /// when `None`). An empty list clears them.
    fn set_highlighted_lines(&self, file_path: Option<&str>, ranges: Vec<(usize, usize)>);
}

#[derive(Default)]
struct EditorState {
    active: Option<String>,
    scratch: EditorBuffer,
    files: BTreeMap<String, EditorBuffer>,
}

/// Editor kept in memory.
///
/// Buffers without a path live in a single scratch slot, which is active until
/// a file is opened.
#[derive(Clone, Default)]
pub struct InMemoryEditor {
    state: Arc<RwLock<EditorState>>,
}

impl InMemoryEditor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Editor holding a single scratch buffer with `text`.
    pub fn with_text(text: impl Into<String>) -> Self {
        let editor = Self::new();
        editor.open(EditorBuffer::new(text));
        editor
    }

    /// Open `buffer` and make it active, replacing a buffer with the same path.
    pub fn open(&self, buffer: EditorBuffer) {
        let mut state = self.state.write();
        match buffer.file_path.clone() {
            Some(path) => {
                state.files.insert(path.clone(), buffer);
                state.active = Some(path);
            }
            None => {
                state.scratch = buffer;
                state.active = None;
            }
        }
    }

    /// Make the file at `path` active. Returns false if it is not open.
    pub fn activate(&self, path: &str) -> bool {
        let mut state = self.state.write();
        if state.files.contains_key(path) {
            state.active = Some(path.to_string());
            true
        } else {
            false
        }
    }

    /// Replace the text of the active buffer.
    pub fn set_text(&self, text: impl Into<String>) {
        let mut state = self.state.write();
        let text = text.into();
        match state.active.clone() {
            Some(path) => {
                if let Some(buffer) = state.files.get_mut(&path) {
                    buffer.source_text = text;
                }
            }
            None => state.scratch.source_text = text,
        }
    }

    /// Replace the breakpoints of the active buffer.
    pub fn set_breakpoints(&self, lines: impl IntoIterator<Item = usize>) {
        let lines: BTreeSet<usize> = lines.into_iter().collect();
        let mut state = self.state.write();
        match state.active.clone() {
            Some(path) => {
                if let Some(buffer) = state.files.get_mut(&path) {
                    buffer.breakpoint_lines = lines;
                }
            }
            None => state.scratch.breakpoint_lines = lines,
        }
    }

    /// Highlights of the buffer at `file_path` (the active buffer when `None`).
    pub fn highlights(&self, file_path: Option<&str>) -> Vec<(usize, usize)> {
        let state = self.state.read();
        match file_path.or(state.active.as_deref()) {
            Some(path) => state
                .files
                .get(path)
                .map(|b| b.highlighted_line_ranges.clone())
                .unwrap_or_default(),
            None => state.scratch.highlighted_line_ranges.clone(),
        }
    }
}

impl EditorSurface for InMemoryEditor {
    fn active_buffer(&self) -> Option<EditorBuffer> {
        let state = self.state.read();
        match &state.active {
            Some(path) => state.files.get(path).cloned(),
            None => Some(state.scratch.clone()),
        }
    }

    fn buffers(&self, root: &str) -> Vec<EditorBuffer> {
        let prefix = if root.ends_with('/') {
            root.to_string()
        } else {
            format!("{}/", root)
        };
        self.state
            .read()
            .files
            .iter()
            .filter(|(path, _)| path.starts_with(&prefix))
            .map(|(_, buffer)| buffer.clone())
            .collect()
    }

    fn set_highlighted_lines(&self, file_path: Option<&str>, ranges: Vec<(usize, usize)>) {
        let mut state = self.state.write();
        let target = file_path.map(str::to_string).or_else(|| state.active.clone());
        match target {
            Some(path) => {
                if let Some(buffer) = state.files.get_mut(&path) {
                    buffer.highlighted_line_ranges = ranges;
                }
            }
            None => state.scratch.highlighted_line_ranges = ranges,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scratch_buffer_is_active_by_default() {
        let editor = InMemoryEditor::with_text("1 + 1;");
        let buffer = editor.active_buffer().unwrap();
        assert_eq!(buffer.source_text, "1 + 1;");
        assert!(buffer.file_path.is_none());
    }

    #[test]
    fn test_buffers_under_root() {
        let editor = InMemoryEditor::new();
        editor.open(EditorBuffer::new("1;").at("/project/main"));
        editor.open(EditorBuffer::new("2;").at("/project/lib/util"));
        editor.open(EditorBuffer::new("3;").at("/projector/other"));
        let paths: Vec<_> = editor
            .buffers("/project")
            .into_iter()
            .filter_map(|b| b.file_path)
            .collect();
        assert_eq!(paths, vec!["/project/lib/util", "/project/main"]);
        assert_eq!(editor.buffers("/").len(), 3);
    }

    #[test]
    fn test_highlights_follow_active_buffer() {
        let editor = InMemoryEditor::new();
        editor.open(EditorBuffer::new("1;").at("/main"));
        editor.open(EditorBuffer::new("2;").at("/lib"));
        assert!(editor.activate("/main"));
        editor.set_highlighted_lines(None, vec![(3, 3)]);
        assert_eq!(editor.highlights(Some("/main")), vec![(3, 3)]);
        assert!(editor.highlights(Some("/lib")).is_empty());
        editor.set_highlighted_lines(Some("/main"), Vec::new());
        assert!(editor.highlights(None).is_empty());
    }

    #[test]
    fn test_breakpoints_on_active_buffer() {
        let editor = InMemoryEditor::with_text("1;\n2;\n3;");
        editor.set_breakpoints([2, 3]);
        assert_eq!(
            editor.active_buffer().unwrap().breakpoint_lines,
            [2, 3].into_iter().collect()
        );
        assert!(!editor.activate("/missing"));
    }
}
