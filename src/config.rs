// IMPULSE CONFIG STORE
// SINGLE MUTEX AROUND THE TUNABLE SET, THE SCALING RANGE AND THE
// AWAKE/SLEEP PROFILE STATE. THE TICK NEVER READS LIVE TUNABLES: IT
// TAKES ONE IMMUTABLE SNAPSHOT UP FRONT AND DECIDES FROM THAT, SO A
// CONCURRENT SETTER CAN NEVER TEAR A TICK IN HALF.
//
// SETTERS WITH CROSS-CUTTING SIDE EFFECTS LIVE HERE INSTEAD OF ON
// Tuners: THEY NEED THE RANGE, THE PROFILE STATE OR THE RESET
// GENERATION, ALL UNDER THE SAME LOCK.

use std::sync::Mutex;

use crate::error::{GovernorError, Result};
use crate::freq_table::{FreqTable, ScalingJumps};
use crate::tuners::{Tuners, MAX_EXTRA_UNITS, MAX_SAMPLING_DOWN_FACTOR};

// TABLE INDICES, NOT KHZ. LOWER INDEX = HIGHER FREQUENCY.
// INVARIANT: soft_limit_idx >= hard_limit_idx.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalingRange {
    pub hard_limit_idx: usize,
    pub soft_limit_idx: usize,
}

impl ScalingRange {
    pub fn unlimited() -> Self {
        Self { hard_limit_idx: 0, soft_limit_idx: 0 }
    }
}

// EVERYTHING THE SLEEP PROFILE OVERWRITES, SAVED FOR RESUME
#[derive(Debug, Clone)]
struct AwakeProfile {
    sampling_rate_us: u32,
    up_threshold: u32,
    down_threshold: u32,
    smooth_up: u32,
    freq_step: u32,
    freq_limit_khz: u32,
    fast_scaling: u32,
    // None WHEN hotplug_sleep == 0 (THRESHOLDS WERE LEFT ALONE)
    hotplug_up: Option<[u32; MAX_EXTRA_UNITS]>,
    lcdfreq_enable: bool,
}

struct ConfigInner {
    tuners: Tuners,
    range: ScalingRange,
    awake: Option<AwakeProfile>,
    // MOMENTUM BASE: sampling_down_factor AS SET BY THE USER, BEFORE
    // THE PER-TICK MOMENTUM ADDITION
    orig_sampling_down_factor: u32,
    orig_sampling_down_max_mom: u32,
    // BUMPED WHENEVER A SETTER INVALIDATES PER-UNIT MEASUREMENT STATE.
    // THE TICK COMPARES AND REBASELINES INSTEAD OF ANYONE REACHING
    // INTO ANOTHER THREAD'S COUNTERS.
    reset_gen: u64,
}

// ONE CONSISTENT VIEW OF THE CONFIG, TAKEN ONCE PER TICK
#[derive(Clone)]
pub struct ConfigSnapshot {
    pub tuners: Tuners,
    pub range: ScalingRange,
    pub jumps: ScalingJumps,
    pub reset_gen: u64,
    pub suspended: bool,
}

pub struct ConfigStore {
    inner: Mutex<ConfigInner>,
}

impl ConfigStore {
    pub fn new(tuners: Tuners) -> Self {
        let orig_factor = tuners.sampling_down_factor;
        let orig_mom = tuners.sampling_down_max_momentum;
        Self {
            inner: Mutex::new(ConfigInner {
                tuners,
                range: ScalingRange::unlimited(),
                awake: None,
                orig_sampling_down_factor: orig_factor,
                orig_sampling_down_max_mom: orig_mom,
                reset_gen: 0,
            }),
        }
    }

    pub fn snapshot(&self) -> ConfigSnapshot {
        let inner = self.inner.lock().unwrap();
        ConfigSnapshot {
            jumps: ScalingJumps::from_mode(inner.tuners.fast_scaling),
            tuners: inner.tuners.clone(),
            range: inner.range,
            reset_gen: inner.reset_gen,
            suspended: inner.awake.is_some(),
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.inner.lock().unwrap().awake.is_some()
    }

    // RANGE-ONLY TUNABLE EDITS GO THROUGH HERE
    pub fn update_tuners<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Tuners) -> Result<()>,
    {
        let mut inner = self.inner.lock().unwrap();
        f(&mut inner.tuners)
    }

    // MOMENTUM CAP. HEADROOM CHECK KEEPS factor + momentum WITHIN THE
    // FACTOR CEILING. CHANGING IT REBASELINES ALL MOMENTUM STATE.
    pub fn set_sampling_down_max_momentum(&self, v: u32) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if v > MAX_SAMPLING_DOWN_FACTOR - inner.orig_sampling_down_factor {
            return Err(GovernorError::InvalidInput("sampling_down_max_momentum"));
        }
        inner.tuners.sampling_down_max_momentum = v;
        inner.orig_sampling_down_max_mom = v;
        inner.tuners.sampling_down_factor = inner.orig_sampling_down_factor;
        inner.reset_gen += 1;
        Ok(())
    }

    pub fn set_sampling_down_factor(&self, v: u32) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if v < 1 || v > MAX_SAMPLING_DOWN_FACTOR {
            return Err(GovernorError::InvalidInput("sampling_down_factor"));
        }
        inner.tuners.sampling_down_factor = v;
        inner.orig_sampling_down_factor = v;
        inner.reset_gen += 1;
        Ok(())
    }

    // TICK-SIDE: FOLD THE CURRENT MOMENTUM INTO THE EFFECTIVE FACTOR
    pub fn apply_momentum(&self, momentum: u32) {
        let mut inner = self.inner.lock().unwrap();
        inner.tuners.sampling_down_factor =
            (inner.orig_sampling_down_factor + momentum).min(MAX_SAMPLING_DOWN_FACTOR);
    }

    // IDLE BASELINES CHANGE MEANING, SO EVERY UNIT REBASELINES
    pub fn set_ignore_nice_load(&self, on: bool) {
        let mut inner = self.inner.lock().unwrap();
        if inner.tuners.ignore_nice_load == on {
            return;
        }
        inner.tuners.ignore_nice_load = on;
        inner.reset_gen += 1;
    }

    // SOFT CAP. ZERO CLEARS IT BACK TO THE HARD LIMIT, ANY OTHER VALUE
    // MUST BE A TABLE LEVEL. A CAP ABOVE THE HARD LIMIT CLAMPS TO IT.
    pub fn set_freq_limit(&self, table: &FreqTable, khz: u32) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if khz == 0 {
            inner.tuners.freq_limit_khz = 0;
            inner.range.soft_limit_idx = inner.range.hard_limit_idx;
            return Ok(());
        }
        let idx = table
            .index_of(khz)
            .ok_or(GovernorError::InvalidInput("freq_limit"))?;
        let soft = idx.max(inner.range.hard_limit_idx);
        inner.range.soft_limit_idx = soft;
        inner.tuners.freq_limit_khz = table.khz_at(soft);
        Ok(())
    }

    pub fn set_freq_limit_sleep(&self, table: &FreqTable, khz: u32) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if khz != 0 && table.index_of(khz).is_none() {
            return Err(GovernorError::InvalidInput("freq_limit_sleep"));
        }
        inner.tuners.freq_limit_sleep_khz = khz;
        Ok(())
    }

    // HOST POLICY MAXIMUM MOVED. A SOFT CAP NOW SITTING ABOVE THE NEW
    // CEILING IS MEANINGLESS AND GETS CLEARED. RETURNS THE NEW RANGE
    // FOR THE CALLER TO CLAMP THE LIVE LEVEL AGAINST.
    pub fn apply_hard_limit(&self, table: &FreqTable, new_max_khz: u32) -> ScalingRange {
        let mut inner = self.inner.lock().unwrap();
        let hard = table
            .index_of(new_max_khz)
            .unwrap_or_else(|| nearest_at_or_below(table, new_max_khz));
        inner.range.hard_limit_idx = hard;
        if inner.tuners.freq_limit_khz > table.khz_at(hard) {
            inner.tuners.freq_limit_khz = 0;
        }
        refresh_soft_limit(&mut inner, table);
        inner.range
    }

    pub fn range(&self) -> ScalingRange {
        self.inner.lock().unwrap().range
    }

    // RETURNS true WHEN THE CALLER MUST FORCE ALL UNITS ONLINE
    pub fn set_disable_hotplug(&self, on: bool) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.tuners.disable_hotplug = on;
        on
    }

    // RETURNS true WHEN THE CALLER MUST RELEASE THE DISPLAY LOCK
    pub fn set_lcdfreq_enable(&self, on: bool) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let was = inner.tuners.lcdfreq_enable;
        inner.tuners.lcdfreq_enable = on;
        was && !on
    }

    // SWAP IN THE SLEEP PROFILE. IDEMPOTENT: A SECOND SUSPEND IS A
    // NO-OP AND RETURNS false.
    pub fn suspend_profile(&self, table: &FreqTable) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.awake.is_some() {
            return false;
        }

        let hotplug_up = if inner.tuners.hotplug_sleep != 0 {
            Some(inner.tuners.up_threshold_hotplug)
        } else {
            None
        };
        inner.awake = Some(AwakeProfile {
            sampling_rate_us: inner.tuners.sampling_rate_us,
            up_threshold: inner.tuners.up_threshold,
            down_threshold: inner.tuners.down_threshold,
            smooth_up: inner.tuners.smooth_up,
            freq_step: inner.tuners.freq_step,
            freq_limit_khz: inner.tuners.freq_limit_khz,
            fast_scaling: inner.tuners.fast_scaling,
            hotplug_up,
            lcdfreq_enable: inner.tuners.lcdfreq_enable,
        });

        // MOMENTUM OFF WHILE ASLEEP, BASE FACTOR STAYS
        inner.tuners.sampling_down_max_momentum = 0;
        inner.tuners.lcdfreq_enable = false;

        inner.tuners.sampling_rate_us = inner
            .tuners
            .sampling_rate_us
            .saturating_mul(inner.tuners.sampling_rate_sleep_multiplier);
        inner.tuners.up_threshold = inner.tuners.up_threshold_sleep;
        inner.tuners.down_threshold = inner.tuners.down_threshold_sleep;
        inner.tuners.smooth_up = inner.tuners.smooth_up_sleep;
        inner.tuners.freq_step = inner.tuners.freq_step_sleep;
        inner.tuners.freq_limit_khz = inner.tuners.freq_limit_sleep_khz;
        inner.tuners.fast_scaling = inner.tuners.fast_scaling_sleep;

        // hotplug_sleep N CAPS THE SLEEPING MACHINE AT N UNITS: ZERO
        // THE UP-THRESHOLDS OF UNITS N AND ABOVE
        if inner.tuners.hotplug_sleep != 0 {
            for k in 1..=MAX_EXTRA_UNITS {
                if k as u32 >= inner.tuners.hotplug_sleep {
                    inner.tuners.up_threshold_hotplug[k - 1] = 0;
                }
            }
        }

        refresh_soft_limit(&mut inner, table);
        true
    }

    // RESTORE THE AWAKE PROFILE. IDEMPOTENT LIKE SUSPEND.
    // RETURNS THE RESTORED lcdfreq_enable STATE FOR THE DISPLAY PLANE.
    pub fn resume_profile(&self, table: &FreqTable) -> Option<bool> {
        let mut inner = self.inner.lock().unwrap();
        let awake = inner.awake.take()?;

        if let Some(saved) = awake.hotplug_up {
            inner.tuners.up_threshold_hotplug = saved;
        }
        inner.tuners.sampling_down_max_momentum = inner.orig_sampling_down_max_mom;
        inner.tuners.sampling_rate_us = awake.sampling_rate_us;
        inner.tuners.up_threshold = awake.up_threshold;
        inner.tuners.down_threshold = awake.down_threshold;
        inner.tuners.smooth_up = awake.smooth_up;
        inner.tuners.freq_step = awake.freq_step;
        inner.tuners.freq_limit_khz = awake.freq_limit_khz;
        inner.tuners.fast_scaling = awake.fast_scaling;
        inner.tuners.lcdfreq_enable = awake.lcdfreq_enable;

        refresh_soft_limit(&mut inner, table);
        Some(awake.lcdfreq_enable)
    }
}

fn nearest_at_or_below(table: &FreqTable, khz: u32) -> usize {
    (0..table.len())
        .find(|&i| table.khz_at(i) <= khz)
        .unwrap_or(table.last_index())
}

// RECOMPUTE soft FROM THE ACTIVE freq_limit, NEVER ABOVE hard
fn refresh_soft_limit(inner: &mut ConfigInner, table: &FreqTable) {
    let hard = inner.range.hard_limit_idx;
    inner.range.soft_limit_idx = if inner.tuners.freq_limit_khz == 0 {
        hard
    } else {
        table
            .index_of(inner.tuners.freq_limit_khz)
            .map(|i| i.max(hard))
            .unwrap_or(hard)
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuners::DEF_UP_THRESHOLD;

    #[test]
    fn snapshot_carries_derived_jumps() {
        let cfg = ConfigStore::new(Tuners::default());
        cfg.update_tuners(|t| t.set_fast_scaling(6)).unwrap();
        let snap = cfg.snapshot();
        assert_eq!(snap.jumps, ScalingJumps { up: 2, down: 2 });
        assert!(!snap.suspended);
    }

    #[test]
    fn freq_limit_moves_soft_cap_and_zero_clears_it() {
        let table = FreqTable::builtin();
        let cfg = ConfigStore::new(Tuners::default());
        cfg.set_freq_limit(&table, 1_000_000).unwrap();
        assert_eq!(cfg.range().soft_limit_idx, 8);
        assert!(cfg.set_freq_limit(&table, 1_234_567).is_err());
        assert_eq!(cfg.range().soft_limit_idx, 8);
        cfg.set_freq_limit(&table, 0).unwrap();
        assert_eq!(cfg.range(), ScalingRange::unlimited());
    }

    #[test]
    fn soft_cap_never_rises_above_hard_limit() {
        let table = FreqTable::builtin();
        let cfg = ConfigStore::new(Tuners::default());
        cfg.apply_hard_limit(&table, 1_400_000);
        // CAP REQUEST ABOVE THE HARD MAX CLAMPS DOWN TO IT
        cfg.set_freq_limit(&table, 1_700_000).unwrap();
        let r = cfg.range();
        assert_eq!(r.hard_limit_idx, 4);
        assert_eq!(r.soft_limit_idx, 4);
        assert_eq!(cfg.snapshot().tuners.freq_limit_khz, 1_400_000);
    }

    #[test]
    fn lowering_the_hard_limit_clears_a_stale_soft_cap() {
        let table = FreqTable::builtin();
        let cfg = ConfigStore::new(Tuners::default());
        cfg.set_freq_limit(&table, 1_700_000).unwrap();
        let r = cfg.apply_hard_limit(&table, 1_400_000);
        assert_eq!(cfg.snapshot().tuners.freq_limit_khz, 0);
        assert_eq!(r.soft_limit_idx, r.hard_limit_idx);
    }

    #[test]
    fn hard_limit_snaps_to_nearest_listed_level() {
        let table = FreqTable::builtin();
        let cfg = ConfigStore::new(Tuners::default());
        let r = cfg.apply_hard_limit(&table, 1_450_000);
        assert_eq!(r.hard_limit_idx, 4); // 1400000
    }

    #[test]
    fn momentum_folds_into_factor_without_moving_the_base() {
        let cfg = ConfigStore::new(Tuners::default());
        cfg.set_sampling_down_factor(4).unwrap();
        cfg.set_sampling_down_max_momentum(16).unwrap();
        cfg.apply_momentum(10);
        assert_eq!(cfg.snapshot().tuners.sampling_down_factor, 14);
        cfg.apply_momentum(0);
        assert_eq!(cfg.snapshot().tuners.sampling_down_factor, 4);
    }

    #[test]
    fn momentum_headroom_is_enforced() {
        let cfg = ConfigStore::new(Tuners::default());
        cfg.set_sampling_down_factor(MAX_SAMPLING_DOWN_FACTOR).unwrap();
        assert!(cfg.set_sampling_down_max_momentum(1).is_err());
    }

    #[test]
    fn cross_cutting_setters_bump_the_reset_generation() {
        let cfg = ConfigStore::new(Tuners::default());
        let g0 = cfg.snapshot().reset_gen;
        cfg.set_ignore_nice_load(true);
        let g1 = cfg.snapshot().reset_gen;
        assert!(g1 > g0);
        // SAME VALUE AGAIN IS A NO-OP
        cfg.set_ignore_nice_load(true);
        assert_eq!(cfg.snapshot().reset_gen, g1);
        cfg.set_sampling_down_factor(2).unwrap();
        assert!(cfg.snapshot().reset_gen > g1);
    }

    #[test]
    fn suspend_swaps_profile_and_resume_restores_it() {
        let table = FreqTable::builtin();
        let cfg = ConfigStore::new(Tuners::default());
        cfg.set_sampling_down_max_momentum(16).unwrap();
        cfg.update_tuners(|t| {
            t.set_hotplug_sleep(1)?;
            t.set_fast_scaling(2)
        })
        .unwrap();
        cfg.set_freq_limit(&table, 1_200_000).unwrap();
        cfg.update_tuners(|t| {
            t.set_freq_step(10);
            Ok(())
        })
        .unwrap();

        assert!(cfg.suspend_profile(&table));
        let asleep = cfg.snapshot();
        assert!(asleep.suspended);
        assert_eq!(asleep.tuners.up_threshold, 90);
        assert_eq!(asleep.tuners.down_threshold, 44);
        assert_eq!(asleep.tuners.smooth_up, 100);
        assert_eq!(asleep.tuners.sampling_rate_us, 200_000);
        assert_eq!(asleep.tuners.sampling_down_max_momentum, 0);
        // hotplug_sleep = 1 PARKS EVERY EXTRA UNIT
        assert_eq!(asleep.tuners.up_threshold_hotplug, [0, 0, 0]);
        // SLEEP LIMIT IS UNSET, SO THE SOFT CAP CLEARS
        assert_eq!(asleep.range.soft_limit_idx, 0);

        // SECOND SUSPEND IS A NO-OP
        assert!(!cfg.suspend_profile(&table));

        assert_eq!(cfg.resume_profile(&table), Some(false));
        let awake = cfg.snapshot();
        assert!(!awake.suspended);
        assert_eq!(awake.tuners.up_threshold, DEF_UP_THRESHOLD);
        assert_eq!(awake.tuners.sampling_rate_us, 100_000);
        assert_eq!(awake.tuners.sampling_down_max_momentum, 16);
        assert_eq!(awake.tuners.up_threshold_hotplug, [68, 68, 68]);
        assert_eq!(awake.tuners.freq_limit_khz, 1_200_000);
        assert_eq!(awake.range.soft_limit_idx, 6);
        assert_eq!(awake.tuners.freq_step, 10);

        // SECOND RESUME IS A NO-OP
        assert_eq!(cfg.resume_profile(&table), None);
    }

    #[test]
    fn hotplug_sleep_zero_leaves_thresholds_alone() {
        let table = FreqTable::builtin();
        let cfg = ConfigStore::new(Tuners::default());
        assert!(cfg.suspend_profile(&table));
        assert_eq!(cfg.snapshot().tuners.up_threshold_hotplug, [68, 68, 68]);
        cfg.resume_profile(&table);
        assert_eq!(cfg.snapshot().tuners.up_threshold_hotplug, [68, 68, 68]);
    }
}
