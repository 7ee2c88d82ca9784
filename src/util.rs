//! Small shared helpers.

use std::time::{Duration, Instant};

/// Rate limiter for warnings that would otherwise fire per packet.
///
/// `ready()` returns `true` at most once per interval; the caller does the
/// actual logging so the message can carry context.
#[derive(Debug)]
pub(crate) struct ThrottledLog {
    interval: Duration,
    last: Option<Instant>,
}

impl ThrottledLog {
    pub fn new(interval: Duration) -> Self {
        ThrottledLog {
            interval,
            last: None,
        }
    }

    pub fn ready(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_call_is_ready_then_throttled() {
        let mut log = ThrottledLog::new(Duration::from_secs(60));
        assert!(log.ready());
        assert!(!log.ready());
    }
}
