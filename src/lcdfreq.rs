// IMPULSE DISPLAY REFRESH SCALING
// WHEN DEMAND SITS BELOW A FREQUENCY/CORE-COUNT THRESHOLD FOR LONG
// ENOUGH, THE PANEL DROPS TO ITS LOW REFRESH RATE; SUSTAINED DEMAND
// BRINGS IT BACK UP. TWO DELAY COUNTERS DEBOUNCE THE SWITCH SO A
// SINGLE SPIKE NEVER FLIPS THE PANEL.
//
// PURE STATE MACHINE. THE GOVERNOR COMMITS THE RESULT THROUGH A
// DisplayPlane.

use crate::tuners::Tuners;

// HOST-SIDE PANEL HOOK. low = REDUCED REFRESH RATE.
pub trait DisplayPlane: Send + Sync {
    fn lock_refresh(&self, low: bool);
}

#[derive(Debug, Clone, Copy)]
pub struct LcdState {
    // TRUE WHILE THE PANEL IS LOCKED TO THE LOW RATE
    lock_low: bool,
    down_left: u32,
    up_left: u32,
}

impl LcdState {
    pub fn new(tuners: &Tuners) -> Self {
        Self {
            lock_low: false,
            down_left: tuners.lcdfreq_kick_in_down_delay,
            up_left: tuners.lcdfreq_kick_in_up_delay,
        }
    }

    pub fn is_low(&self) -> bool {
        self.lock_low
    }

    // DEMAND IS "HIGH" WHEN THE REQUESTED LEVEL REACHES kick_in_freq
    // (WITH THE CORE GATE SATISFIED) OR MORE CORES ARE ONLINE THAN THE
    // CORE GATE ASKS FOR
    fn demand_high(tuners: &Tuners, requested_khz: u32, online_count: usize) -> bool {
        let cores = tuners.lcdfreq_kick_in_cores as usize;
        (tuners.lcdfreq_kick_in_freq <= requested_khz && cores == 0)
            || (tuners.lcdfreq_kick_in_freq <= requested_khz && cores != 0 && cores == online_count)
            || (cores != 0 && cores < online_count)
    }

    // ONE TICK. Some(low) WHEN THE PANEL LOCK MUST CHANGE.
    pub fn evaluate(
        &mut self,
        tuners: &Tuners,
        requested_khz: u32,
        online_count: usize,
    ) -> Option<bool> {
        if Self::demand_high(tuners, requested_khz, online_count) {
            self.down_left = tuners.lcdfreq_kick_in_down_delay;
            self.up_left = self.up_left.saturating_sub(1);
        } else {
            self.up_left = tuners.lcdfreq_kick_in_up_delay;
            self.down_left = self.down_left.saturating_sub(1);
        }

        if self.up_left == 0 && self.lock_low {
            self.lock_low = false;
            return Some(false);
        }
        if self.down_left == 0 && !self.lock_low {
            self.lock_low = true;
            return Some(true);
        }
        None
    }

    // FORCE THE PANEL BACK TO FULL RATE. Some(false) WHEN A LOCK WAS
    // ACTUALLY HELD. USED ON DISABLE, SUSPEND AND GOVERNOR STOP.
    pub fn force_full_rate(&mut self, tuners: &Tuners) -> Option<bool> {
        let was_low = self.lock_low;
        *self = Self::new(tuners);
        if was_low {
            Some(false)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuners() -> Tuners {
        let mut t = Tuners::default();
        t.lcdfreq_enable = true;
        t.lcdfreq_kick_in_down_delay = 3;
        t.lcdfreq_kick_in_up_delay = 2;
        t
    }

    #[test]
    fn sustained_low_demand_drops_the_panel_after_the_delay() {
        let t = tuners();
        let mut s = LcdState::new(&t);
        assert_eq!(s.evaluate(&t, 200_000, 1), None);
        assert_eq!(s.evaluate(&t, 200_000, 1), None);
        assert_eq!(s.evaluate(&t, 200_000, 1), Some(true));
        assert!(s.is_low());
        // ALREADY LOW: NO REPEAT COMMAND
        assert_eq!(s.evaluate(&t, 200_000, 1), None);
    }

    #[test]
    fn a_single_spike_resets_the_down_delay() {
        let t = tuners();
        let mut s = LcdState::new(&t);
        s.evaluate(&t, 200_000, 1);
        s.evaluate(&t, 200_000, 1);
        // SPIKE TO HIGH DEMAND ONE TICK BEFORE THE DROP
        assert_eq!(s.evaluate(&t, 800_000, 1), None);
        // FULL DELAY REQUIRED AGAIN
        assert_eq!(s.evaluate(&t, 200_000, 1), None);
        assert_eq!(s.evaluate(&t, 200_000, 1), None);
        assert_eq!(s.evaluate(&t, 200_000, 1), Some(true));
    }

    #[test]
    fn sustained_demand_restores_full_rate() {
        let t = tuners();
        let mut s = LcdState::new(&t);
        for _ in 0..3 {
            s.evaluate(&t, 200_000, 1);
        }
        assert!(s.is_low());
        assert_eq!(s.evaluate(&t, 800_000, 1), None);
        assert_eq!(s.evaluate(&t, 800_000, 1), Some(false));
        assert!(!s.is_low());
    }

    #[test]
    fn core_gate_changes_what_counts_as_demand() {
        let mut t = tuners();
        t.lcdfreq_kick_in_cores = 2;
        let mut s = LcdState::new(&t);
        // FAST LEVEL BUT ONLY ONE CORE: NOT HIGH DEMAND
        assert!(!LcdState::demand_high(&t, 800_000, 1));
        // CORE COUNT MATCHES THE GATE, FREQ THRESHOLD APPLIES
        assert!(LcdState::demand_high(&t, 800_000, 2));
        assert!(!LcdState::demand_high(&t, 200_000, 2));
        // MORE CORES THAN THE GATE: DEMAND REGARDLESS OF LEVEL
        assert!(LcdState::demand_high(&t, 200_000, 3));
        let _ = s.evaluate(&t, 200_000, 3);
        assert_eq!(s.down_left, t.lcdfreq_kick_in_down_delay);
    }

    #[test]
    fn force_full_rate_reports_only_when_a_lock_was_held() {
        let t = tuners();
        let mut s = LcdState::new(&t);
        assert_eq!(s.force_full_rate(&t), None);
        for _ in 0..3 {
            s.evaluate(&t, 200_000, 1);
        }
        assert!(s.is_low());
        assert_eq!(s.force_full_rate(&t), Some(false));
        assert!(!s.is_low());
    }
}
