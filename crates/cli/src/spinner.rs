//! Wait indicator shown while a turn is in flight.

use std::io::{IsTerminal, Write};
use std::time::Duration;

use tokio::task::JoinHandle;

const FRAMES: &[char] = &['|', '/', '-', '\\'];
const TICK: Duration = Duration::from_millis(120);

/// Animates on stderr until dropped.
///
/// Dropping the guard stops the animation on every exit path, including
/// errors and early returns, and clears the line it drew on.
pub struct Spinner {
    task: Option<JoinHandle<()>>,
}

impl Spinner {
    pub fn start(label: &'static str) -> Self {
        if !std::io::stderr().is_terminal() {
            return Self { task: None };
        }
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TICK);
            for frame in FRAMES.iter().cycle() {
                ticker.tick().await;
                let mut err = std::io::stderr().lock();
                let _ = write!(err, "\r{frame} {label}");
                let _ = err.flush();
            }
        });
        Self { task: Some(task) }
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let mut err = std::io::stderr().lock();
            let _ = write!(err, "\r\x1b[2K");
            let _ = err.flush();
        }
    }
}
