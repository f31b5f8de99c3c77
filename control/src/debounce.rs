//! Time-window debouncing of noisy digital inputs.
//!
//! Each logical input owns its own [`Debouncer`]. A level change is accepted
//! only if at least the debounce window passed since the last accepted
//! change. Rejected changes do not restart the window, so a chattering
//! contact cannot keep extending it.

/// Default debounce window for buttons and the encoder switch.
pub const DEBOUNCE_WINDOW_MS: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Edge {
    /// High to low. A press on active-low wiring.
    Falling,
    /// Low to high. A release on active-low wiring.
    Rising,
}

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Debouncer {
    window: u32,
    level: bool,
    last_event: Option<u32>,
}

impl Debouncer {
    /// The initial level is the one the input rests at, high for pull-ups.
    pub fn new(window: u32, initial_level: bool) -> Self {
        Self {
            window,
            level: initial_level,
            last_event: None,
        }
    }

    /// Sample the raw level at time `now` (wrapping milliseconds).
    pub fn poll(&mut self, raw_level: bool, now: u32) -> Option<Edge> {
        if raw_level == self.level {
            return None;
        }

        if let Some(last_event) = self.last_event {
            if now.wrapping_sub(last_event) < self.window {
                return None;
            }
        }

        self.level = raw_level;
        self.last_event = Some(now);

        if raw_level {
            Some(Edge::Rising)
        } else {
            Some(Edge::Falling)
        }
    }

    /// Poll an active-low button, reporting only presses.
    pub fn poll_press(&mut self, raw_level: bool, now: u32) -> bool {
        matches!(self.poll(raw_level, now), Some(Edge::Falling))
    }

    /// Debounced level, true when the active-low input is held.
    pub fn is_pressed(&self) -> bool {
        !self.level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flips_inside_window_collapse_into_one_edge() {
        let mut debouncer = Debouncer::new(20, true);

        assert_eq!(debouncer.poll(false, 0), Some(Edge::Falling));
        assert_eq!(debouncer.poll(true, 5), None);
        assert_eq!(debouncer.poll(true, 25), Some(Edge::Rising));
    }

    #[test]
    fn flips_spaced_beyond_window_report_independently() {
        let mut debouncer = Debouncer::new(20, true);

        assert_eq!(debouncer.poll(false, 100), Some(Edge::Falling));
        assert_eq!(debouncer.poll(true, 120), Some(Edge::Rising));
        assert_eq!(debouncer.poll(false, 140), Some(Edge::Falling));
    }

    #[test]
    fn rejected_change_does_not_restart_window() {
        let mut debouncer = Debouncer::new(20, true);
        assert_eq!(debouncer.poll(false, 0), Some(Edge::Falling));

        // Chatter every few milliseconds. Had each rejection restarted the
        // window, the change at 21 would be rejected too.
        for now in [3, 6, 9, 12, 15, 18] {
            assert_eq!(debouncer.poll(now % 2 == 0, now), None);
        }
        assert_eq!(debouncer.poll(true, 21), Some(Edge::Rising));
    }

    #[test]
    fn first_change_is_accepted_immediately_after_boot() {
        let mut debouncer = Debouncer::new(DEBOUNCE_WINDOW_MS, true);
        assert!(debouncer.poll_press(false, 0));
    }

    #[test]
    fn press_is_reported_only_on_falling_edge() {
        let mut debouncer = Debouncer::new(20, true);

        assert!(debouncer.poll_press(false, 0));
        assert!(debouncer.is_pressed());
        assert!(!debouncer.poll_press(true, 50));
        assert!(!debouncer.is_pressed());
        assert!(debouncer.poll_press(false, 100));
    }

    #[test]
    fn steady_level_reports_nothing() {
        let mut debouncer = Debouncer::new(20, true);
        for now in 0..100 {
            assert_eq!(debouncer.poll(true, now), None);
        }
    }

    #[test]
    fn survives_timer_wrap_around() {
        let mut debouncer = Debouncer::new(20, true);

        assert_eq!(debouncer.poll(false, u32::MAX - 5), Some(Edge::Falling));
        assert_eq!(debouncer.poll(true, 3), None);
        assert_eq!(debouncer.poll(true, 15), Some(Edge::Rising));
    }

    #[test]
    fn inputs_do_not_share_timer() {
        let mut play = Debouncer::new(20, true);
        let mut stop = Debouncer::new(20, true);

        assert!(play.poll_press(false, 0));
        assert!(stop.poll_press(false, 5));
    }
}
