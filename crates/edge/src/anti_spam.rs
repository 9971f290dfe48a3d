//! Per-connection sliding-window spam gate (`§4.9`).

use std::sync::Mutex;
use std::time::{Duration, Instant};

use chat_fabric_protocol::{ANTI_SPAM_MAX_MESSAGES, ANTI_SPAM_WINDOW_SECS};

struct Window {
    counter: u32,
    reset_at: Instant,
}

/// One `counter` / `reset_at` pair per `ClientConnection`. `now` is
/// injectable so tests can exercise the window boundary without sleeping
/// (`§6.9`).
pub struct AntiSpam {
    window: Mutex<Window>,
}

impl AntiSpam {
    pub fn new() -> Self {
        Self::at(Instant::now())
    }

    fn at(now: Instant) -> Self {
        Self {
            window: Mutex::new(Window {
                counter: 0,
                reset_at: now + Duration::from_secs(ANTI_SPAM_WINDOW_SECS),
            }),
        }
    }

    /// `true` if this message is admitted, `false` if the sender has tripped
    /// the spam gate (`§4.9`, `§7` code 10007).
    pub fn check(&self) -> bool {
        self.check_at(Instant::now())
    }

    fn check_at(&self, now: Instant) -> bool {
        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        if now > window.reset_at {
            window.counter = 0;
            window.reset_at = now + Duration::from_secs(ANTI_SPAM_WINDOW_SECS);
        }
        if window.counter >= ANTI_SPAM_MAX_MESSAGES {
            return false;
        }
        window.counter += 1;
        true
    }
}

impl Default for AntiSpam {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_hundred_messages_are_accepted_and_the_301st_is_rejected() {
        let spam = AntiSpam::at(Instant::now());
        for _ in 0..ANTI_SPAM_MAX_MESSAGES {
            assert!(spam.check());
        }
        assert!(!spam.check());
    }

    #[test]
    fn counter_resets_once_the_window_elapses() {
        let start = Instant::now();
        let spam = AntiSpam::at(start);
        for _ in 0..ANTI_SPAM_MAX_MESSAGES {
            assert!(spam.check_at(start));
        }
        assert!(!spam.check_at(start));
        let after_window = start + Duration::from_secs(ANTI_SPAM_WINDOW_SECS + 1);
        assert!(spam.check_at(after_window));
    }
}
