//
// progress.rs
// dcmsort
//
// Shared indicatif helpers so every pass draws the same way.
//

use indicatif::{ProgressBar, ProgressStyle};

/// Determinate bar for per-file passes (copy, send, rewrite).
pub fn file_bar(len: u64, label: &str) -> ProgressBar {
    let bar = ProgressBar::new(len);
    bar.set_style(
        ProgressStyle::with_template("{msg:>13} [{bar:40}] {pos}/{len}")
            .unwrap()
            .progress_chars("=> "),
    );
    bar.set_message(label.to_string());
    bar
}

/// Spinner for the walk, where the total is not known up front.
pub fn scan_spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner} scanning {pos} files").unwrap());
    spinner
}
