// IMPULSE TUNABLE SET
// EVERY KNOB THE GOVERNOR EXPOSES, WITH THE AWAKE/SLEEP SPLIT: MOST
// SCALING TUNABLES CARRY A SECOND VALUE THAT TAKES OVER WHILE THE
// DISPLAY IS OFF. SETTERS VALIDATE, REJECT, AND NEVER HALF-APPLY.

use crate::error::{GovernorError, Result};
use crate::freq_table::MAX_FAST_SCALING;

// EXTRA UNITS BEYOND UNIT 0 THAT HOTPLUG MAY MANAGE
pub const MAX_EXTRA_UNITS: usize = 3;

pub const DEF_SAMPLING_RATE_US: u32 = 100_000;
pub const DEF_UP_THRESHOLD: u32 = 70;
pub const DEF_UP_THRESHOLD_SLEEP: u32 = 90;
pub const DEF_UP_THRESHOLD_HOTPLUG: u32 = 68;
pub const DEF_DOWN_THRESHOLD: u32 = 52;
pub const DEF_DOWN_THRESHOLD_SLEEP: u32 = 44;
pub const DEF_DOWN_THRESHOLD_HOTPLUG: u32 = 55;
pub const DEF_FREQ_STEP: u32 = 5;
pub const DEF_FREQ_STEP_SLEEP: u32 = 5;
pub const DEF_SMOOTH_UP: u32 = 75;
pub const DEF_SMOOTH_UP_SLEEP: u32 = 100;
pub const DEF_SAMPLING_DOWN_FACTOR: u32 = 1;
pub const MAX_SAMPLING_DOWN_FACTOR: u32 = 100_000;
pub const DEF_SAMPLING_DOWN_MAX_MOMENTUM: u32 = 0;
pub const DEF_SAMPLING_DOWN_MOM_SENS: u32 = 50;
pub const MAX_SAMPLING_DOWN_MOM_SENS: u32 = 1_000;
pub const DEF_SAMPLING_RATE_SLEEP_MULTIPLIER: u32 = 2;
pub const MAX_SAMPLING_RATE_SLEEP_MULTIPLIER: u32 = 4;
pub const DEF_GRAD_UP_THRESHOLD: u32 = 25;
pub const DEF_HOTPLUG_SLEEP: u32 = 0;
pub const DEF_LCDFREQ_KICK_IN_DOWN_DELAY: u32 = 20;
pub const DEF_LCDFREQ_KICK_IN_UP_DELAY: u32 = 50;
pub const DEF_LCDFREQ_KICK_IN_FREQ: u32 = 500_000;
pub const DEF_LCDFREQ_KICK_IN_CORES: u32 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tuners {
    pub sampling_rate_us: u32,
    pub sampling_rate_sleep_multiplier: u32,
    pub sampling_down_factor: u32,
    pub sampling_down_max_momentum: u32,
    pub sampling_down_mom_sens: u32,
    pub up_threshold: u32,
    pub up_threshold_sleep: u32,
    // INDEX k CONTROLS UNIT k+1. ZERO DISABLES THAT UNIT'S UP-CHECK.
    pub up_threshold_hotplug: [u32; MAX_EXTRA_UNITS],
    pub down_threshold: u32,
    pub down_threshold_sleep: u32,
    pub down_threshold_hotplug: [u32; MAX_EXTRA_UNITS],
    pub ignore_nice_load: bool,
    pub freq_step: u32,
    pub freq_step_sleep: u32,
    pub smooth_up: u32,
    pub smooth_up_sleep: u32,
    // 0 KEEPS HOTPLUG THRESHOLDS DURING SLEEP, 1..=3 ZEROES THEM
    pub hotplug_sleep: u32,
    pub freq_limit_khz: u32,
    pub freq_limit_sleep_khz: u32,
    pub fast_scaling: u32,
    pub fast_scaling_sleep: u32,
    pub grad_up_threshold: u32,
    pub early_demand: bool,
    pub disable_hotplug: bool,
    pub lcdfreq_enable: bool,
    pub lcdfreq_kick_in_down_delay: u32,
    pub lcdfreq_kick_in_up_delay: u32,
    pub lcdfreq_kick_in_freq: u32,
    pub lcdfreq_kick_in_cores: u32,
}

impl Default for Tuners {
    fn default() -> Self {
        Self {
            sampling_rate_us: DEF_SAMPLING_RATE_US,
            sampling_rate_sleep_multiplier: DEF_SAMPLING_RATE_SLEEP_MULTIPLIER,
            sampling_down_factor: DEF_SAMPLING_DOWN_FACTOR,
            sampling_down_max_momentum: DEF_SAMPLING_DOWN_MAX_MOMENTUM,
            sampling_down_mom_sens: DEF_SAMPLING_DOWN_MOM_SENS,
            up_threshold: DEF_UP_THRESHOLD,
            up_threshold_sleep: DEF_UP_THRESHOLD_SLEEP,
            up_threshold_hotplug: [DEF_UP_THRESHOLD_HOTPLUG; MAX_EXTRA_UNITS],
            down_threshold: DEF_DOWN_THRESHOLD,
            down_threshold_sleep: DEF_DOWN_THRESHOLD_SLEEP,
            down_threshold_hotplug: [DEF_DOWN_THRESHOLD_HOTPLUG; MAX_EXTRA_UNITS],
            ignore_nice_load: false,
            freq_step: DEF_FREQ_STEP,
            freq_step_sleep: DEF_FREQ_STEP_SLEEP,
            smooth_up: DEF_SMOOTH_UP,
            smooth_up_sleep: DEF_SMOOTH_UP_SLEEP,
            hotplug_sleep: DEF_HOTPLUG_SLEEP,
            freq_limit_khz: 0,
            freq_limit_sleep_khz: 0,
            fast_scaling: 0,
            fast_scaling_sleep: 0,
            grad_up_threshold: DEF_GRAD_UP_THRESHOLD,
            early_demand: false,
            disable_hotplug: false,
            lcdfreq_enable: false,
            lcdfreq_kick_in_down_delay: DEF_LCDFREQ_KICK_IN_DOWN_DELAY,
            lcdfreq_kick_in_up_delay: DEF_LCDFREQ_KICK_IN_UP_DELAY,
            lcdfreq_kick_in_freq: DEF_LCDFREQ_KICK_IN_FREQ,
            lcdfreq_kick_in_cores: DEF_LCDFREQ_KICK_IN_CORES,
        }
    }
}

// RANGE-ONLY SETTERS. KNOBS WITH CROSS-CUTTING SIDE EFFECTS
// (sampling_down_factor, max_momentum, ignore_nice_load, freq limits,
// disable_hotplug, lcdfreq_enable) GO THROUGH ConfigStore INSTEAD.
impl Tuners {
    pub fn set_sampling_rate_us(&mut self, v: u32, min_rate_us: u32) {
        self.sampling_rate_us = v.max(min_rate_us);
    }

    pub fn set_sampling_rate_sleep_multiplier(&mut self, v: u32) -> Result<()> {
        if v < 1 || v > MAX_SAMPLING_RATE_SLEEP_MULTIPLIER {
            return Err(GovernorError::InvalidInput("sampling_rate_sleep_multiplier"));
        }
        self.sampling_rate_sleep_multiplier = v;
        Ok(())
    }

    pub fn set_sampling_down_mom_sens(&mut self, v: u32) -> Result<()> {
        if v < 1 || v > MAX_SAMPLING_DOWN_MOM_SENS {
            return Err(GovernorError::InvalidInput("sampling_down_momentum_sensitivity"));
        }
        self.sampling_down_mom_sens = v;
        Ok(())
    }

    // SETS BOTH THRESHOLDS IN ONE STEP. THE SINGLE-KNOB SETTERS
    // VALIDATE AGAINST THE CURRENT COUNTERPART, WHICH REJECTS VALID
    // PAIRS ON EITHER SIDE OF THE PRIOR VALUES; A PAIRED WRITE ONLY
    // HAS TO BE CONSISTENT WITH ITSELF.
    pub fn set_thresholds(&mut self, up: u32, down: u32) -> Result<()> {
        if up > 100 || down < 11 || down >= up {
            return Err(GovernorError::InvalidInput("threshold pair"));
        }
        self.up_threshold = up;
        self.down_threshold = down;
        Ok(())
    }

    // INVARIANT HELD EVERYWHERE: down_threshold < up_threshold
    pub fn set_up_threshold(&mut self, v: u32) -> Result<()> {
        if v > 100 || v <= self.down_threshold {
            return Err(GovernorError::InvalidInput("up_threshold"));
        }
        self.up_threshold = v;
        Ok(())
    }

    pub fn set_up_threshold_sleep(&mut self, v: u32) -> Result<()> {
        if v > 100 || v <= self.down_threshold_sleep {
            return Err(GovernorError::InvalidInput("up_threshold_sleep"));
        }
        self.up_threshold_sleep = v;
        Ok(())
    }

    // ZERO MEANS "NEVER PLUG THIS UNIT IN FROM THE UP-CHECK"
    pub fn set_up_threshold_hotplug(&mut self, unit: usize, v: u32) -> Result<()> {
        if unit == 0 || unit > MAX_EXTRA_UNITS {
            return Err(GovernorError::InvalidInput("hotplug unit index"));
        }
        if v > 100 || (v <= self.down_threshold && v != 0) {
            return Err(GovernorError::InvalidInput("up_threshold_hotplug"));
        }
        self.up_threshold_hotplug[unit - 1] = v;
        Ok(())
    }

    pub fn set_down_threshold(&mut self, v: u32) -> Result<()> {
        if v < 11 || v > 100 || v >= self.up_threshold {
            return Err(GovernorError::InvalidInput("down_threshold"));
        }
        self.down_threshold = v;
        Ok(())
    }

    pub fn set_down_threshold_sleep(&mut self, v: u32) -> Result<()> {
        if v < 11 || v > 100 || v >= self.up_threshold_sleep {
            return Err(GovernorError::InvalidInput("down_threshold_sleep"));
        }
        self.down_threshold_sleep = v;
        Ok(())
    }

    pub fn set_down_threshold_hotplug(&mut self, unit: usize, v: u32) -> Result<()> {
        if unit == 0 || unit > MAX_EXTRA_UNITS {
            return Err(GovernorError::InvalidInput("hotplug unit index"));
        }
        if v < 11 || v > 100 || v >= self.up_threshold {
            return Err(GovernorError::InvalidInput("down_threshold_hotplug"));
        }
        self.down_threshold_hotplug[unit - 1] = v;
        Ok(())
    }

    // VALUES ABOVE 100 SATURATE INSTEAD OF FAILING. ZERO IS A VALID
    // "HOLD CURRENT LEVEL" SETTING.
    pub fn set_freq_step(&mut self, v: u32) {
        self.freq_step = v.min(100);
    }

    pub fn set_freq_step_sleep(&mut self, v: u32) {
        self.freq_step_sleep = v.min(100);
    }

    pub fn set_smooth_up(&mut self, v: u32) -> Result<()> {
        if v < 1 || v > 100 {
            return Err(GovernorError::InvalidInput("smooth_up"));
        }
        self.smooth_up = v;
        Ok(())
    }

    pub fn set_smooth_up_sleep(&mut self, v: u32) -> Result<()> {
        if v < 1 || v > 100 {
            return Err(GovernorError::InvalidInput("smooth_up_sleep"));
        }
        self.smooth_up_sleep = v;
        Ok(())
    }

    pub fn set_hotplug_sleep(&mut self, v: u32) -> Result<()> {
        if v > MAX_EXTRA_UNITS as u32 {
            return Err(GovernorError::InvalidInput("hotplug_sleep"));
        }
        self.hotplug_sleep = v;
        Ok(())
    }

    pub fn set_fast_scaling(&mut self, v: u32) -> Result<()> {
        if v > MAX_FAST_SCALING {
            return Err(GovernorError::InvalidInput("fast_scaling"));
        }
        self.fast_scaling = v;
        Ok(())
    }

    pub fn set_fast_scaling_sleep(&mut self, v: u32) -> Result<()> {
        if v > MAX_FAST_SCALING {
            return Err(GovernorError::InvalidInput("fast_scaling_sleep"));
        }
        self.fast_scaling_sleep = v;
        Ok(())
    }

    pub fn set_grad_up_threshold(&mut self, v: u32) -> Result<()> {
        if v < 11 || v > 100 {
            return Err(GovernorError::InvalidInput("grad_up_threshold"));
        }
        self.grad_up_threshold = v;
        Ok(())
    }

    pub fn set_early_demand(&mut self, on: bool) {
        self.early_demand = on;
    }

    pub fn set_lcdfreq_kick_in_down_delay(&mut self, v: u32) {
        self.lcdfreq_kick_in_down_delay = v;
    }

    pub fn set_lcdfreq_kick_in_up_delay(&mut self, v: u32) {
        self.lcdfreq_kick_in_up_delay = v;
    }

    pub fn set_lcdfreq_kick_in_cores(&mut self, v: u32) -> Result<()> {
        if v > (MAX_EXTRA_UNITS as u32) + 1 {
            return Err(GovernorError::InvalidInput("lcdfreq_kick_in_cores"));
        }
        self.lcdfreq_kick_in_cores = v;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_stay_ordered() {
        let mut t = Tuners::default();
        // CANNOT PUSH up BELOW down OR down ABOVE up
        assert!(t.set_up_threshold(52).is_err());
        assert!(t.set_up_threshold(101).is_err());
        assert!(t.set_down_threshold(70).is_err());
        assert!(t.set_down_threshold(10).is_err());
        assert!(t.set_up_threshold(80).is_ok());
        assert!(t.set_down_threshold(60).is_ok());
        assert_eq!((t.up_threshold, t.down_threshold), (80, 60));
    }

    #[test]
    fn threshold_pair_applies_regardless_of_prior_values() {
        let mut t = Tuners::default(); // 70 / 52
        // BOTH ABOVE THE OLD up: SINGLE-KNOB ORDER WOULD REJECT THIS
        assert!(t.set_thresholds(90, 80).is_ok());
        assert_eq!((t.up_threshold, t.down_threshold), (90, 80));
        // AND BOTH BELOW THE OLD down
        assert!(t.set_thresholds(50, 40).is_ok());
        assert!(t.set_thresholds(40, 70).is_err());
        assert!(t.set_thresholds(101, 50).is_err());
        assert!(t.set_thresholds(50, 10).is_err());
        assert_eq!((t.up_threshold, t.down_threshold), (50, 40));
    }

    #[test]
    fn rejected_setter_keeps_prior_value() {
        let mut t = Tuners::default();
        assert!(t.set_smooth_up(0).is_err());
        assert_eq!(t.smooth_up, DEF_SMOOTH_UP);
        assert!(t.set_grad_up_threshold(5).is_err());
        assert_eq!(t.grad_up_threshold, DEF_GRAD_UP_THRESHOLD);
    }

    #[test]
    fn hotplug_threshold_zero_disables_but_midrange_must_clear_down() {
        let mut t = Tuners::default();
        assert!(t.set_up_threshold_hotplug(1, 0).is_ok());
        assert_eq!(t.up_threshold_hotplug[0], 0);
        assert!(t.set_up_threshold_hotplug(2, 40).is_err()); // <= down_threshold
        assert!(t.set_up_threshold_hotplug(0, 50).is_err()); // UNIT 0 IS NOT MANAGED
        assert!(t.set_up_threshold_hotplug(3, 90).is_ok());
    }

    #[test]
    fn freq_step_saturates() {
        let mut t = Tuners::default();
        t.set_freq_step(250);
        assert_eq!(t.freq_step, 100);
        t.set_freq_step(0);
        assert_eq!(t.freq_step, 0);
    }

    #[test]
    fn fast_scaling_range() {
        let mut t = Tuners::default();
        assert!(t.set_fast_scaling(9).is_err());
        assert!(t.set_fast_scaling(8).is_ok());
        assert!(t.set_fast_scaling_sleep(5).is_ok());
    }

    #[test]
    fn sampling_rate_floors_at_minimum() {
        let mut t = Tuners::default();
        t.set_sampling_rate_us(1_000, 20_000);
        assert_eq!(t.sampling_rate_us, 20_000);
        t.set_sampling_rate_us(50_000, 20_000);
        assert_eq!(t.sampling_rate_us, 50_000);
    }

    #[test]
    fn hotplug_sleep_caps_at_managed_units() {
        let mut t = Tuners::default();
        assert!(t.set_hotplug_sleep(4).is_err());
        assert!(t.set_hotplug_sleep(3).is_ok());
        assert!(t.set_hotplug_sleep(0).is_ok());
    }
}
