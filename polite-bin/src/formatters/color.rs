//! Defines the colors used in the output of the CLI.
//!
//! `console` disables styling on its own when the output is not a terminal.

use console::Style;

pub(crate) fn normal() -> Style {
    Style::new()
}

pub(crate) fn dim() -> Style {
    Style::new().dim()
}

pub(crate) fn green() -> Style {
    Style::new().color256(2).bold().bright()
}

pub(crate) fn bold_yellow() -> Style {
    Style::new().yellow().bold().bright()
}

pub(crate) fn pink() -> Style {
    Style::new().color256(197)
}

pub(crate) fn bold_pink() -> Style {
    Style::new().color256(197).bold()
}

// Used for debug log messages
pub(crate) fn blue() -> Style {
    Style::new().blue().bright()
}
