//! Version command implementation.

use crate::style::colors::SemanticStyle;

const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn run() {
    println!("{} {VERSION}", "fastrestore".header());
    println!();
    println!("Parallel restore of key-value database backups.");
    println!();
    println!("Build info:");
    println!("  Target: {}", std::env::consts::ARCH);
    println!("  OS:     {}", std::env::consts::OS);
}
