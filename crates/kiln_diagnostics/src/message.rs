//! Structured compiler messages with an optional file location.

use crate::category::MessageCategory;
use kiln_common::FileUrl;
use serde::{Deserialize, Serialize};

/// A single message reported during compilation.
///
/// `line` and `column` are 1-based and only meaningful together with `file`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerMessage {
    /// The category of this message.
    pub category: MessageCategory,
    /// The message text.
    pub text: String,
    /// The file the message refers to, if any.
    pub file: Option<FileUrl>,
    /// The line within `file`, if known.
    pub line: Option<u32>,
    /// The column within `line`, if known.
    pub column: Option<u32>,
}

impl CompilerMessage {
    /// Creates a message of the given category with no location.
    pub fn new(category: MessageCategory, text: impl Into<String>) -> Self {
        Self {
            category,
            text: text.into(),
            file: None,
            line: None,
            column: None,
        }
    }

    /// Creates an error message with no location.
    pub fn error(text: impl Into<String>) -> Self {
        Self::new(MessageCategory::Error, text)
    }

    /// Creates a warning message with no location.
    pub fn warning(text: impl Into<String>) -> Self {
        Self::new(MessageCategory::Warning, text)
    }

    /// Creates an informational message with no location.
    pub fn info(text: impl Into<String>) -> Self {
        Self::new(MessageCategory::Information, text)
    }

    /// Attaches a file to this message.
    pub fn with_file(mut self, file: FileUrl) -> Self {
        self.file = Some(file);
        self
    }

    /// Attaches a line and column to this message.
    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn create_error() {
        let msg = CompilerMessage::error("unexpected token");
        assert_eq!(msg.category, MessageCategory::Error);
        assert_eq!(msg.text, "unexpected token");
        assert!(msg.file.is_none());
    }

    #[test]
    fn builder_methods() {
        let file = FileUrl::from_path(Path::new("/src/B.src"));
        let msg = CompilerMessage::warning("deprecated call")
            .with_file(file.clone())
            .at(3, 7);
        assert_eq!(msg.file, Some(file));
        assert_eq!(msg.line, Some(3));
        assert_eq!(msg.column, Some(7));
    }
}
