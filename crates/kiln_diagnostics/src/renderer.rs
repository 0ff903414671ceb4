//! Rendering compiler messages for the terminal.

use crate::category::MessageCategory;
use crate::message::CompilerMessage;

/// Trait for rendering messages into formatted output strings.
pub trait MessageRenderer {
    /// Renders a single message into a formatted string.
    fn render(&self, message: &CompilerMessage) -> String;
}

/// Renders messages in a rustc-style terminal format.
///
/// Produces output like:
/// ```text
/// error: cannot resolve symbol 'Foo'
///   --> /work/core/src/B.src:10:5
/// ```
pub struct TerminalRenderer {
    /// Whether to use ANSI color codes in output.
    pub color: bool,
}

impl TerminalRenderer {
    /// Creates a new terminal renderer.
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    fn header(&self, category: MessageCategory) -> String {
        if !self.color {
            return category.to_string();
        }
        let code = match category {
            MessageCategory::Error => "31",
            MessageCategory::Warning => "33",
            MessageCategory::Information => "36",
        };
        format!("\x1b[1;{code}m{category}\x1b[0m")
    }
}

impl MessageRenderer for TerminalRenderer {
    fn render(&self, message: &CompilerMessage) -> String {
        let mut out = format!("{}: {}\n", self.header(message.category), message.text);
        if let Some(file) = &message.file {
            out.push_str(&format!("  --> {}", file.path_str()));
            if let Some(line) = message.line {
                out.push_str(&format!(":{line}"));
                if let Some(column) = message.column {
                    out.push_str(&format!(":{column}"));
                }
            }
            out.push('\n');
        }
        out
    }
}
