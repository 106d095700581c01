use foundation::time::Millis;

/// Call ceiling over a fixed, self-resetting time window.
///
/// The window restarts on the first call observed after it has elapsed, so a
/// quiet period fully restores the budget.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CallBudget {
    max_calls: u32,
    window_ms: u64,
    window_start: Option<Millis>,
    used: u32,
}

impl CallBudget {
    pub fn new(max_calls: u32, window_ms: u64) -> Self {
        Self {
            max_calls,
            window_ms,
            window_start: None,
            used: 0,
        }
    }

    pub fn max_calls(&self) -> u32 {
        self.max_calls
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn remaining(&self, now: Millis) -> u32 {
        if self.window_expired(now) {
            return self.max_calls;
        }
        self.max_calls.saturating_sub(self.used)
    }

    pub fn is_exhausted(&self, now: Millis) -> bool {
        self.remaining(now) == 0
    }

    /// Attempts to spend one call.
    ///
    /// Returns `true` if the call fits in the current window.
    pub fn try_consume(&mut self, now: Millis) -> bool {
        if self.window_expired(now) {
            self.window_start = Some(now);
            self.used = 0;
        }
        if self.used >= self.max_calls {
            return false;
        }
        self.used += 1;
        true
    }

    fn window_expired(&self, now: Millis) -> bool {
        match self.window_start {
            None => true,
            Some(start) => now.saturating_since(start) >= self.window_ms,
        }
    }
}
