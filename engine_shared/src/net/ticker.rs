//! Monotonic, pausable tick counter.
//!
//! Grounded in the pausable variant of the original timer: ticks accrue
//! from wall-clock elapsed time while running, freeze while paused, and can
//! be offset for clock sync without touching the underlying clock.

use tokio::time::Instant;

/// Ticks per second. Matches the session/server step rate throughout.
pub const TICK_RATE: u64 = 64;

/// A pausable 64 Hz tick source built over `tokio::time::Instant`.
///
/// `get_total_ticks` is monotonic while running: pausing freezes it,
/// `set_tick_offset` nudges it for RTT-based clock sync without disturbing
/// the underlying wall clock.
pub struct Ticker {
    enabled: bool,
    start: Option<Instant>,
    paused: bool,
    pause_started: Option<Instant>,
    pause_accum: std::time::Duration,
    tick_offset: i64,
}

impl Default for Ticker {
    fn default() -> Self {
        Self::new()
    }
}

impl Ticker {
    pub fn new() -> Self {
        Self {
            enabled: false,
            start: None,
            paused: false,
            pause_started: None,
            pause_accum: std::time::Duration::ZERO,
            tick_offset: 0,
        }
    }

    pub fn start(&mut self) {
        self.enabled = true;
        self.start = Some(Instant::now());
        self.paused = false;
        self.pause_started = None;
        self.pause_accum = std::time::Duration::ZERO;
        self.tick_offset = 0;
    }

    pub fn stop(&mut self) {
        self.enabled = false;
        self.start = None;
        self.paused = false;
        self.pause_started = None;
        self.pause_accum = std::time::Duration::ZERO;
        self.tick_offset = 0;
    }

    pub fn pause(&mut self) {
        if self.enabled && !self.paused {
            self.paused = true;
            self.pause_started = Some(Instant::now());
        }
    }

    pub fn unpause(&mut self) {
        if let Some(paused_at) = self.pause_started.take() {
            self.pause_accum += paused_at.elapsed();
        }
        self.paused = false;
    }

    /// Shifts the reported tick count by `offset` ticks (may be negative),
    /// without affecting the underlying elapsed-time accounting. Used to
    /// align a client's clock to a server's after a round trip.
    pub fn set_tick_offset(&mut self, offset: i64) {
        self.tick_offset = offset;
    }

    /// Ticks elapsed since `start`, frozen while paused, shifted by the
    /// last `set_tick_offset`. Returns 0 if not running.
    pub fn get_total_ticks(&self) -> u64 {
        let Some(start) = self.start else {
            return 0;
        };
        if !self.enabled {
            return 0;
        }
        let elapsed = if self.paused {
            self.pause_started
                .map(|p| p.duration_since(start))
                .unwrap_or_default()
                - self.pause_accum
        } else {
            start.elapsed() - self.pause_accum
        };
        let base = (elapsed.as_millis() as u64 * TICK_RATE) / 1000;
        base.saturating_add_signed(self.tick_offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ticks_advance_with_time() {
        let mut t = Ticker::new();
        t.start();
        assert_eq!(t.get_total_ticks(), 0);
        tokio::time::advance(std::time::Duration::from_secs(1)).await;
        assert_eq!(t.get_total_ticks(), TICK_RATE);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_freezes_ticks() {
        let mut t = Ticker::new();
        t.start();
        tokio::time::advance(std::time::Duration::from_millis(500)).await;
        t.pause();
        let frozen = t.get_total_ticks();
        tokio::time::advance(std::time::Duration::from_secs(5)).await;
        assert_eq!(t.get_total_ticks(), frozen);
        t.unpause();
        tokio::time::advance(std::time::Duration::from_millis(500)).await;
        assert_eq!(t.get_total_ticks(), TICK_RATE);
    }

    #[test]
    fn offset_shifts_reported_ticks() {
        let mut t = Ticker::new();
        t.start();
        t.set_tick_offset(100);
        assert_eq!(t.get_total_ticks(), 100);
        t.set_tick_offset(-1);
        assert_eq!(t.get_total_ticks(), 0);
    }

    #[test]
    fn stopped_ticker_reads_zero() {
        let t = Ticker::new();
        assert_eq!(t.get_total_ticks(), 0);
    }
}
