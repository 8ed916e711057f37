// IMPULSE GOVERNOR CORE
// LIFECYCLE + THE PERIODIC TICK. ONE WORKER THREAD PER SCALING DOMAIN
// RUNS sample -> decide -> commit UNDER A SINGLE TICK LOCK. EXTERNAL
// EVENTS (LIMIT CHANGES, SUSPEND/RESUME, TUNABLE FLIPS) EITHER TAKE
// THAT LOCK OR DEFER; NOTHING EVER SPINS WAITING FOR THE TICK.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::config::{ConfigSnapshot, ConfigStore};
use crate::cpu::{CpuPlane, Relation};
use crate::error::{GovernorError, Result};
use crate::freq_table::{Direction, FreqTable};
use crate::hotplug;
use crate::lcdfreq::{DisplayPlane, LcdState};
use crate::sampler::{early_demand_boost, DomainCtl, UnitState};

// SAMPLING FLOOR DERIVATION, ALL MICROSECONDS
const MIN_SAMPLING_RATE_RATIO: u32 = 2;
const BASE_SAMPLING_RATE_US: u32 = 10_000;
const LATENCY_MULTIPLIER: u32 = 1_000;
const MIN_LATENCY_MULTIPLIER: u32 = 100;

// WORKER WAKES AT LEAST THIS OFTEN TO NOTICE CANCELLATION
const MAX_SLEEP_CHUNK_US: u64 = 20_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitsOutcome {
    Applied,
    // TICK LOCK WAS BUSY; THE NEXT TICK PICKS THE RANGE UP FROM THE
    // CONFIG STORE INSTEAD OF ANYONE BLOCKING HERE
    Deferred,
}

#[derive(Default)]
pub struct GovStats {
    pub ticks: AtomicU64,
    pub up_decisions: AtomicU64,
    pub down_decisions: AtomicU64,
    pub hotplug_enables: AtomicU64,
    pub hotplug_disables: AtomicU64,
    pub glitches: AtomicU64,
    pub deferred_limit_events: AtomicU64,
    pub last_load: AtomicU64,
    pub last_requested_khz: AtomicU64,
}

// EVERYTHING THE TICK MUTATES, ALL BEHIND ONE MUTEX
struct DomainState {
    unit_states: Vec<UnitState>,
    ctl: DomainCtl,
    lcd: LcdState,
    requested_khz: u32,
    policy_min_khz: u32,
    policy_max_khz: u32,
    prev_max_load: u32,
    seen_reset_gen: u64,
    // INTERVAL FOR THE NEXT SLEEP, WRITTEN AT THE END OF EACH TICK
    interval_us: u64,
}

struct DomainRunner {
    cancel: Arc<AtomicBool>,
    tick_lock: Arc<Mutex<DomainState>>,
    handle: thread::JoinHandle<()>,
}

// SHARED, IMMUTABLE SIDE OF THE WORKER
struct DomainWorker {
    cfg: Arc<ConfigStore>,
    table: Arc<FreqTable>,
    plane: Arc<dyn CpuPlane>,
    display: Option<Arc<dyn DisplayPlane>>,
    skip_hotplug: Arc<AtomicBool>,
    stats: Arc<GovStats>,
}

pub struct Governor {
    cfg: Arc<ConfigStore>,
    table: Arc<FreqTable>,
    plane: Arc<dyn CpuPlane>,
    display: Option<Arc<dyn DisplayPlane>>,
    skip_hotplug: Arc<AtomicBool>,
    stats: Arc<GovStats>,
    runner: Option<DomainRunner>,
    min_sampling_rate_us: u32,
}

impl Governor {
    pub fn new(
        cfg: Arc<ConfigStore>,
        table: Arc<FreqTable>,
        plane: Arc<dyn CpuPlane>,
        display: Option<Arc<dyn DisplayPlane>>,
    ) -> Self {
        Self {
            cfg,
            table,
            plane,
            display,
            skip_hotplug: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(GovStats::default()),
            runner: None,
            min_sampling_rate_us: 0,
        }
    }

    pub fn stats(&self) -> Arc<GovStats> {
        Arc::clone(&self.stats)
    }

    pub fn config(&self) -> Arc<ConfigStore> {
        Arc::clone(&self.cfg)
    }

    pub fn is_running(&self) -> bool {
        self.runner.is_some()
    }

    pub fn on_start(&mut self, policy_min_khz: u32, policy_max_khz: u32) -> Result<()> {
        if self.runner.is_some() {
            return Err(GovernorError::InvalidState("governor already running"));
        }
        if policy_min_khz == 0 || policy_max_khz < policy_min_khz {
            return Err(GovernorError::InvalidInput("policy range"));
        }
        let cur = self.plane.current_level();
        if cur == 0 {
            return Err(GovernorError::InvalidState("hardware reports no current level"));
        }
        if self.plane.online_count() == 0 {
            return Err(GovernorError::InvalidState("no unit online"));
        }

        // SAMPLING FLOOR FROM TRANSITION LATENCY, COMPUTED ONCE
        if self.min_sampling_rate_us == 0 {
            let latency = self.plane.transition_latency_us().max(1);
            self.min_sampling_rate_us = (MIN_SAMPLING_RATE_RATIO * BASE_SAMPLING_RATE_US)
                .max(MIN_LATENCY_MULTIPLIER * latency);
            let default_rate = self
                .min_sampling_rate_us
                .max(latency.saturating_mul(LATENCY_MULTIPLIER));
            let min_rate = self.min_sampling_rate_us;
            self.cfg
                .update_tuners(|t| {
                    t.set_sampling_rate_us(default_rate.max(t.sampling_rate_us), min_rate);
                    Ok(())
                })
                .ok();
        }

        self.cfg.apply_hard_limit(&self.table, policy_max_khz);
        let snap = self.cfg.snapshot();

        let mut ctl = DomainCtl::default();
        ctl.start_settle();
        let state = DomainState {
            unit_states: vec![UnitState::default(); self.plane.possible_count()],
            ctl,
            lcd: LcdState::new(&snap.tuners),
            requested_khz: cur,
            policy_min_khz,
            policy_max_khz,
            prev_max_load: 0,
            seen_reset_gen: snap.reset_gen,
            interval_us: snap.tuners.sampling_rate_us as u64,
        };

        let cancel = Arc::new(AtomicBool::new(false));
        let tick_lock = Arc::new(Mutex::new(state));
        let worker = DomainWorker {
            cfg: Arc::clone(&self.cfg),
            table: Arc::clone(&self.table),
            plane: Arc::clone(&self.plane),
            display: self.display.clone(),
            skip_hotplug: Arc::clone(&self.skip_hotplug),
            stats: Arc::clone(&self.stats),
        };

        // OUT-OF-BAND TRANSITIONS: FOLD THE OBSERVED LEVEL BACK INTO
        // requested SO THE NEXT DECISION STARTS FROM REALITY. try_lock
        // BECAUSE THE NOTIFIER MUST NEVER WAIT ON A RUNNING TICK.
        {
            let lock = Arc::clone(&tick_lock);
            self.plane.register_level_listener(Box::new(move |khz| {
                if let Ok(mut st) = lock.try_lock() {
                    st.requested_khz = khz.clamp(st.policy_min_khz, st.policy_max_khz);
                }
            }));
        }

        let thread_cancel = Arc::clone(&cancel);
        let thread_lock = Arc::clone(&tick_lock);
        let handle = thread::spawn(move || {
            while !thread_cancel.load(Ordering::Relaxed) {
                let interval_us = {
                    let mut st = thread_lock.lock().unwrap();
                    worker.tick(&mut st);
                    st.interval_us
                };
                // SLEEP IN SHORT CHUNKS SO STOP NEVER WAITS A WHOLE
                // SAMPLING PERIOD
                let mut left = interval_us;
                while left > 0 && !thread_cancel.load(Ordering::Relaxed) {
                    let chunk = left.min(MAX_SLEEP_CHUNK_US);
                    thread::sleep(Duration::from_micros(chunk));
                    left -= chunk;
                }
            }
        });

        self.runner = Some(DomainRunner { cancel, tick_lock, handle });
        Ok(())
    }

    pub fn on_stop(&mut self) -> Result<()> {
        let runner = self
            .runner
            .take()
            .ok_or(GovernorError::InvalidState("governor not running"))?;
        runner.cancel.store(true, Ordering::Relaxed);
        runner
            .handle
            .join()
            .map_err(|_| GovernorError::InvalidState("worker thread panicked"))?;
        self.plane.clear_level_listener();

        // NEVER LEAVE THE PANEL LOCKED LOW BEHIND A DEAD GOVERNOR
        let snap = self.cfg.snapshot();
        let mut st = runner.tick_lock.lock().unwrap();
        if st.lcd.force_full_rate(&snap.tuners).is_some() {
            if let Some(d) = &self.display {
                d.lock_refresh(false);
            }
        }
        Ok(())
    }

    // HOST POLICY RANGE MOVED. NON-BLOCKING: IF A TICK HOLDS THE LOCK
    // THE EVENT DEFERS AND THE NEXT TICK SEES THE NEW HARD LIMIT
    // THROUGH THE CONFIG STORE ANYWAY.
    pub fn on_limits_changed(&mut self, new_min_khz: u32, new_max_khz: u32) -> Result<LimitsOutcome> {
        if new_min_khz == 0 || new_max_khz < new_min_khz {
            return Err(GovernorError::InvalidInput("policy range"));
        }
        let runner = self
            .runner
            .as_ref()
            .ok_or(GovernorError::InvalidState("governor not running"))?;

        // THE SLEEP PROFILE OWNS THE RANGE WHILE SUSPENDED; THE EVENT
        // IS RE-DELIVERED ONCE AWAKE INSTEAD OF CLOBBERING THE SLEEP
        // CAP MID-SUSPEND
        if self.cfg.is_suspended() {
            self.stats.deferred_limit_events.fetch_add(1, Ordering::Relaxed);
            return Ok(LimitsOutcome::Deferred);
        }

        self.cfg.apply_hard_limit(&self.table, new_max_khz);

        let mut st = match runner.tick_lock.try_lock() {
            Ok(st) => st,
            Err(_) => {
                self.stats.deferred_limit_events.fetch_add(1, Ordering::Relaxed);
                return Ok(LimitsOutcome::Deferred);
            }
        };
        st.policy_min_khz = new_min_khz;
        st.policy_max_khz = new_max_khz;
        st.ctl.start_settle();

        let cur = self.plane.current_level();
        if cur > new_max_khz {
            st.requested_khz = self.plane.set_level(new_max_khz, Relation::AtMost);
        } else if cur < new_min_khz {
            st.requested_khz = self.plane.set_level(new_min_khz, Relation::AtLeast);
        }
        Ok(LimitsOutcome::Applied)
    }

    // DISPLAY WENT DARK: SWAP IN THE SLEEP PROFILE. IDEMPOTENT.
    pub fn suspend(&mut self) -> bool {
        self.skip_hotplug.store(true, Ordering::Relaxed);
        let swapped = self.cfg.suspend_profile(&self.table);
        if swapped {
            self.release_display_lock();
        }
        self.skip_hotplug.store(false, Ordering::Relaxed);
        swapped
    }

    // DISPLAY CAME BACK: EVERY UNIT ONLINE FIRST SO THE WAKEUP IS
    // NEVER STARVED, THEN THE AWAKE PROFILE
    pub fn resume(&mut self) -> bool {
        self.skip_hotplug.store(true, Ordering::Relaxed);
        for unit in 1..self.plane.possible_count() {
            if !self.plane.is_unit_enabled(unit) {
                self.plane.enable_unit(unit);
            }
        }
        let restored = self.cfg.resume_profile(&self.table);
        self.skip_hotplug.store(false, Ordering::Relaxed);
        restored.is_some()
    }

    pub fn set_hotplug_disabled(&self, on: bool) {
        self.cfg.set_disable_hotplug(on);
        if on {
            // MANAGED UNITS ALL COME BACK UP WHEN HOTPLUG IS TAKEN
            // OUT OF THE LOOP
            for unit in 1..self.plane.possible_count() {
                if !self.plane.is_unit_enabled(unit) {
                    self.plane.enable_unit(unit);
                }
            }
        }
    }

    pub fn set_lcdfreq_enabled(&self, on: bool) {
        if self.cfg.set_lcdfreq_enable(on) {
            self.release_display_lock();
        }
    }

    fn release_display_lock(&self) {
        let snap = self.cfg.snapshot();
        if let Some(runner) = &self.runner {
            let mut st = runner.tick_lock.lock().unwrap();
            if st.lcd.force_full_rate(&snap.tuners).is_some() {
                if let Some(d) = &self.display {
                    d.lock_refresh(false);
                }
            }
        }
    }
}

impl Drop for Governor {
    fn drop(&mut self) {
        let _ = self.on_stop();
    }
}

impl DomainWorker {
    fn tick(&self, st: &mut DomainState) {
        self.stats.ticks.fetch_add(1, Ordering::Relaxed);
        let snap = self.cfg.snapshot();
        st.interval_us = snap.tuners.sampling_rate_us as u64 * st.ctl.rate_mult as u64;

        // A CONFIG CHANGE INVALIDATED THE BASELINES: REBASELINE EVERY
        // UNIT HERE, ON THE TICK THREAD, INSTEAD OF THE SETTER
        // REACHING INTO LIVE MEASUREMENT STATE
        if snap.reset_gen != st.seen_reset_gen {
            st.seen_reset_gen = snap.reset_gen;
            for unit in 0..st.unit_states.len() {
                if let Some(s) = self.plane.sample_utilization(unit) {
                    st.unit_states[unit].rebaseline(s);
                }
            }
            st.ctl.config_reset();
            st.prev_max_load = 0;
        }

        let cur = self.plane.current_level();
        let limit = snap.tuners.freq_limit_khz;

        // LEVELS ABOVE THE SOFT CAP (WAKEUP BOOSTS, TOUCH BOOSTS) GET
        // PULLED BACK DOWN BEFORE ANY DECISION
        if limit != 0 && cur > limit {
            st.requested_khz = self.plane.set_level(limit, Relation::AtLeast);
        }

        let max_load = self.sample_domain(st, &snap);
        self.stats.last_load.store(max_load as u64, Ordering::Relaxed);

        let boost = snap.tuners.early_demand
            && early_demand_boost(st.prev_max_load, max_load, snap.tuners.grad_up_threshold);
        st.prev_max_load = max_load;

        if st.ctl.settle_pending() {
            return;
        }
        // freq_step 0 IS AN EXPLICIT USER HOLD
        if snap.tuners.freq_step == 0 {
            return;
        }

        // UP-SCAN RUNS ON EVERY DECIDING TICK. THE DOWN-SCAN ONLY ON
        // NON-UP TICKS: A BOOST TICK MUST NEVER PARK THE UNIT IT IS
        // SCALING UP FOR.
        self.run_hotplug(max_load, &snap, Direction::Up);

        let cur = self.plane.current_level();
        if max_load > snap.tuners.up_threshold || boost {
            self.scale_up(st, &snap, cur, max_load);
            return;
        }
        self.run_hotplug(max_load, &snap, Direction::Down);
        self.scale_down_section(st, &snap, cur, max_load);
        self.run_lcdfreq(st, &snap);
    }

    // MAX LOAD OVER ALL ONLINE UNITS. GLITCHES COUNT BUT NEVER DECIDE.
    fn sample_domain(&self, st: &mut DomainState, snap: &ConfigSnapshot) -> u32 {
        let mut max_load = 0;
        for unit in 0..st.unit_states.len() {
            if !self.plane.is_unit_enabled(unit) {
                continue;
            }
            match self.plane.sample_utilization(unit) {
                Some(sample) => {
                    match st.unit_states[unit].load(sample, snap.tuners.ignore_nice_load) {
                        Some(load) => max_load = max_load.max(load),
                        None => {
                            self.stats.glitches.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
                None => {
                    self.stats.glitches.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        max_load
    }

    fn run_hotplug(&self, max_load: u32, snap: &ConfigSnapshot, scan: Direction) {
        if snap.tuners.disable_hotplug || self.skip_hotplug.load(Ordering::Relaxed) {
            return;
        }
        let online: Vec<bool> = (0..self.plane.possible_count())
            .map(|u| self.plane.is_unit_enabled(u))
            .collect();
        match scan {
            Direction::Up => {
                if let Some(unit) = hotplug::up_candidate(max_load, &online, &snap.tuners) {
                    if self.plane.enable_unit(unit) {
                        self.stats.hotplug_enables.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            Direction::Down => {
                if let Some(unit) = hotplug::down_candidate(max_load, &online, &snap.tuners) {
                    if self.plane.disable_unit(unit) {
                        self.stats.hotplug_disables.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
    }

    fn scale_up(&self, st: &mut DomainState, snap: &ConfigSnapshot, cur: u32, max_load: u32) {
        let t = &snap.tuners;

        // MOMENTUM OFF BUT A STATIC FACTOR SET: THE LEGACY DOWN-SKIP
        // COUNTER RESTARTS ON EVERY UP TICK
        if t.sampling_down_max_momentum == 0 && t.sampling_down_factor > 1 {
            st.ctl.down_skip = 0;
        }
        if cur == st.policy_max_khz {
            return;
        }
        if t.sampling_down_max_momentum != 0 && cur < st.policy_max_khz {
            st.ctl.rate_mult = t.sampling_down_factor;
        }

        let limit = t.freq_limit_khz;
        if limit != 0 && cur == limit {
            return;
        }

        let target = if limit != 0 && cur > limit {
            limit
        } else {
            match self.table.next_level(
                cur,
                Direction::Up,
                max_load,
                t.smooth_up,
                snap.jumps,
                snap.range.soft_limit_idx,
            ) {
                Some(khz) if limit != 0 => khz.min(limit),
                Some(khz) => khz,
                // CURRENT LEVEL NOT IN THE TABLE: HOLD THIS TICK
                None => return,
            }
        };

        let target = target.min(st.policy_max_khz);
        st.requested_khz = self.plane.set_level(target, Relation::AtMost);
        self.stats.up_decisions.fetch_add(1, Ordering::Relaxed);
        self.stats
            .last_requested_khz
            .store(st.requested_khz as u64, Ordering::Relaxed);

        if t.sampling_down_max_momentum != 0 {
            if let Some(m) = st
                .ctl
                .momentum_up(t.sampling_down_max_momentum, t.sampling_down_mom_sens)
            {
                self.cfg.apply_momentum(m);
            }
        }
    }

    fn scale_down_section(&self, st: &mut DomainState, snap: &ConfigSnapshot, cur: u32, max_load: u32) {
        let t = &snap.tuners;

        // LEGACY SAMPLING-DOWN: ONLY EVERY factor-TH NON-UP TICK MAY
        // SCALE DOWN
        if t.sampling_down_max_momentum == 0 && t.sampling_down_factor > 1 {
            st.ctl.down_skip += 1;
            if st.ctl.down_skip < t.sampling_down_factor {
                return;
            }
            st.ctl.down_skip = 0;
        }

        // MOMENTUM DECAYS ON EVERY NON-UP TICK, NOT JUST DOWN TICKS
        if t.sampling_down_max_momentum != 0 {
            if let Some(m) = st
                .ctl
                .momentum_down(t.sampling_down_max_momentum, t.sampling_down_mom_sens)
            {
                self.cfg.apply_momentum(m);
            }
        }

        if max_load >= t.down_threshold {
            return;
        }

        // NO LONGER BUSY: TICK PACE BACK TO NORMAL
        st.ctl.rate_mult = 1;
        st.interval_us = t.sampling_rate_us as u64;

        if cur == st.policy_min_khz {
            return;
        }

        let limit = t.freq_limit_khz;
        let target = if limit != 0 && cur > limit {
            limit
        } else {
            match self.table.next_level(
                cur,
                Direction::Down,
                max_load,
                t.smooth_up,
                snap.jumps,
                snap.range.soft_limit_idx,
            ) {
                Some(khz) => khz,
                None => return,
            }
        };

        let target = target.max(st.policy_min_khz);
        st.requested_khz = self.plane.set_level(target, Relation::AtLeast);
        self.stats.down_decisions.fetch_add(1, Ordering::Relaxed);
        self.stats
            .last_requested_khz
            .store(st.requested_khz as u64, Ordering::Relaxed);
    }

    fn run_lcdfreq(&self, st: &mut DomainState, snap: &ConfigSnapshot) {
        if !snap.tuners.lcdfreq_enable {
            return;
        }
        let online = self.plane.online_count();
        if let Some(low) = st.lcd.evaluate(&snap.tuners, st.requested_khz, online) {
            if let Some(d) = &self.display {
                d.lock_refresh(low);
            }
        }
    }
}
