//! Hover state for citation bubbles

use oracle_wire::Source;

/// Which source excerpt, if any, is currently shown
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tooltip {
    visible: bool,
    text: String,
    ordinal: Option<usize>,
}

impl Tooltip {
    pub fn new() -> Self {
        Self::default()
    }

    /// Activate the bubble for `source`.
    ///
    /// Activating the source already shown hides it; any other source replaces
    /// the text and stays visible.
    pub fn toggle(&mut self, source: &Source) {
        if self.visible && self.ordinal == Some(source.ordinal) {
            self.hide();
        } else {
            self.visible = true;
            self.text = source.origin_text.clone();
            self.ordinal = Some(source.ordinal);
        }
    }

    pub fn hide(&mut self) {
        self.visible = false;
        self.text.clear();
        self.ordinal = None;
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// The excerpt being shown; empty when hidden
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn ordinal(&self) -> Option<usize> {
        self.ordinal
    }
}
