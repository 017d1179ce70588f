//! The operator's current plate value.

/// Either empty, a picked detection's text, or whatever the operator typed.
///
/// No validation happens here; normalization is left to the store at save time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionState {
    value: String,
}

impl SelectionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the current value.
    pub fn select(&mut self, value: impl Into<String>) {
        self.value = value.into();
    }

    pub fn reset(&mut self) {
        self.value.clear();
    }

    pub fn current(&self) -> &str {
        &self.value
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Whether `text` is the current selection, for highlighting.
    pub fn is_selected(&self, text: &str) -> bool {
        !self.value.is_empty() && self.value == text
    }
}
