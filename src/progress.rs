//! User-facing progress output: spinners for long-running steps and plain
//! message lines printed above them.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

/// Spinner style used during ongoing operations.
/// - Yellow spinner with animated braille-style frames.
/// - Displays the current message (`{wide_msg}`) next to the spinner.
pub fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("\x1b[33m{spinner}\x1b[0m {wide_msg}")
        .expect("spinner template")
        .tick_strings(&["⣾", "⣽", "⣻", "⢿", "⡿", "⣟", "⣯", "⣷"])
}

/// Style used when an operation finishes successfully.
pub fn ok_style() -> ProgressStyle {
    ProgressStyle::with_template("\x1b[32m✔\x1b[0m {wide_msg}").expect("ok template")
}

/// Style used when an operation fails with an error.
pub fn err_style() -> ProgressStyle {
    ProgressStyle::with_template("\x1b[31m✘\x1b[0m {wide_msg}").expect("err template")
}

/// Owner of all progress output for one invocation.
///
/// Passed explicitly to the components that report progress.
pub struct Ui {
    mp: MultiProgress,
    quiet: bool,
}

impl Default for Ui {
    fn default() -> Self {
        Self::new()
    }
}

impl Ui {
    pub fn new() -> Self {
        Self {
            mp: MultiProgress::new(),
            quiet: false,
        }
    }

    /// Draws nothing and prints nothing.
    pub fn quiet() -> Self {
        Self {
            mp: MultiProgress::with_draw_target(ProgressDrawTarget::hidden()),
            quiet: true,
        }
    }

    /// Print a line without disturbing active spinners.
    pub fn message(&self, msg: impl AsRef<str>) {
        if self.quiet {
            return;
        }
        self.mp.suspend(|| println!("{}", msg.as_ref()));
    }

    /// Start a spinner for a step. It is cleared if dropped unfinished.
    pub fn task(&self, msg: impl Into<String>) -> Task {
        let msg = msg.into();
        tracing::debug!(task = %msg, "task started");
        let pb = self.mp.add(ProgressBar::new_spinner());
        pb.set_style(spinner_style());
        pb.set_message(msg);
        if !self.quiet {
            pb.enable_steady_tick(Duration::from_millis(80));
        }
        Task { pb, done: false }
    }
}

pub struct Task {
    pb: ProgressBar,
    done: bool,
}

impl Task {
    pub fn set_message(&self, msg: impl Into<String>) {
        self.pb.set_message(msg.into());
    }

    pub fn finish_ok(mut self, msg: impl Into<String>) {
        self.pb.set_style(ok_style());
        self.pb.finish_with_message(msg.into());
        self.done = true;
    }

    pub fn finish_err(mut self, msg: impl Into<String>) {
        self.pb.set_style(err_style());
        self.pb.finish_with_message(msg.into());
        self.done = true;
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        if !self.done {
            self.pb.finish_and_clear();
        }
    }
}
