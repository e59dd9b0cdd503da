//! Marked status lines and labeled sections.

use super::colors::SemanticStyle;

/// Leading symbol of a status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
    Done,
    Failed,
    Warning,
    Hint,
}

impl Mark {
    fn symbol(self) -> String {
        match self {
            Mark::Done => "✓".success(),
            Mark::Failed => "✗".error(),
            Mark::Warning => "⚠".warning(),
            Mark::Hint => "→".muted(),
        }
    }
}

/// Prints `msg` behind its mark. Failures go to stderr; hints are dimmed.
pub fn report(mark: Mark, msg: &str) {
    match mark {
        Mark::Failed => eprintln!("{} {msg}", mark.symbol()),
        Mark::Hint => println!("{} {}", mark.symbol(), msg.muted()),
        Mark::Done | Mark::Warning => println!("{} {msg}", mark.symbol()),
    }
}

/// Prints `title`, one indented `label: value` line per row, then a blank
/// line.
pub fn print_section(title: &str, rows: &[(&str, String)]) {
    println!("{}", title.header());
    for (label, value) in rows {
        println!("  {}: {value}", label.muted());
    }
    println!();
}
