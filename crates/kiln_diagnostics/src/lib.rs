//! Compiler messages, message categories, and terminal rendering.
//!
//! Every stage and every driver step reports user-facing problems as
//! [`CompilerMessage`]s. The thread-safe [`MessageSink`] accumulates them for
//! the duration of one compilation run and answers per-category counts, which
//! the driver uses to short-circuit the stage pipeline and to compute the
//! run's exit status.

#![warn(missing_docs)]

pub mod category;
pub mod message;
pub mod renderer;
pub mod sink;

pub use category::MessageCategory;
pub use message::CompilerMessage;
pub use renderer::{MessageRenderer, TerminalRenderer};
pub use sink::MessageSink;
