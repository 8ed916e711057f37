// IMPULSE LOAD SAMPLER
// PER-UNIT UTILIZATION FROM IDLE/WALL COUNTER DELTAS, PLUS THE
// DOMAIN-LEVEL PACING STATE: SAMPLING-DOWN MOMENTUM, THE LEGACY
// DOWN-SKIP COUNTER AND THE POST-EVENT SETTLE GATE.
//
// PURE MODULE. COUNTERS COME IN THROUGH UnitSample, NOTHING HERE
// TOUCHES /proc OR SYSFS.

// TICKS HELD AFTER A DISRUPTIVE EVENT BEFORE DECISIONS RESUME
pub const SETTLE_TICKS: u32 = 25;

// RAW COUNTERS FOR ONE UNIT, MONOTONIC MICROSECONDS
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitSample {
    pub idle_us: u64,
    pub wall_us: u64,
    pub nice_us: u64,
}

// DELTA BASELINE + LAST OBSERVED LOAD FOR ONE UNIT
#[derive(Debug, Clone, Copy, Default)]
pub struct UnitState {
    prev: UnitSample,
    pub prev_load: u32,
    primed: bool,
}

impl UnitState {
    // REBASELINE WITHOUT PRODUCING A LOAD. USED AT START AND AFTER A
    // CONFIG RESET THAT CHANGES WHAT "IDLE" MEANS.
    pub fn rebaseline(&mut self, cur: UnitSample) {
        self.prev = cur;
        self.prev_load = 0;
        self.primed = true;
    }

    // LOAD IN PERCENT SINCE THE LAST CALL. None ON A MEASUREMENT
    // GLITCH (COUNTER WRAP, ZERO WINDOW, FIRST SAMPLE): THE BASELINE
    // STILL ADVANCES SO THE NEXT TICK IS CLEAN.
    pub fn load(&mut self, cur: UnitSample, ignore_nice: bool) -> Option<u32> {
        if !self.primed {
            self.rebaseline(cur);
            return None;
        }

        let wall = cur.wall_us.wrapping_sub(self.prev.wall_us);
        let mut idle = cur.idle_us.wrapping_sub(self.prev.idle_us);
        if ignore_nice {
            idle = idle.wrapping_add(cur.nice_us.wrapping_sub(self.prev.nice_us));
        }
        self.prev = cur;

        if wall == 0 || wall < idle {
            return None;
        }
        let load = (100 * (wall - idle) / wall) as u32;
        self.prev_load = load;
        Some(load)
    }
}

// THE LOAD GRADIENT IS STEEP ENOUGH THAT NEXT TICK WILL LIKELY CROSS
// up_threshold, SO THE UP-PATH FIRES NOW
pub fn early_demand_boost(prev_load: u32, load: u32, grad_up_threshold: u32) -> bool {
    load > prev_load && load - prev_load > grad_up_threshold
}

// PACING STATE SHARED BY THE WHOLE SCALING DOMAIN
#[derive(Debug, Clone, Copy)]
pub struct DomainCtl {
    // LEGACY SAMPLING-DOWN: TICKS SKIPPED BEFORE A DOWN DECISION
    pub down_skip: u32,
    // SETTLE GATE, NONZERO WHILE DECISIONS ARE HELD
    pub check_skip: u32,
    // TICK INTERVAL MULTIPLIER WHILE MOMENTUM IS RIDING HIGH
    pub rate_mult: u32,
    // MOMENTUM ACCUMULATOR, 0..=sampling_down_mom_sens
    pub momentum_adder: u32,
}

impl Default for DomainCtl {
    fn default() -> Self {
        Self { down_skip: 0, check_skip: 0, rate_mult: 1, momentum_adder: 0 }
    }
}

impl DomainCtl {
    // A CONFIG CHANGE INVALIDATED THE PACING STATE: COUNTERS AND THE
    // INTERVAL MULTIPLIER BACK TO DEFAULTS. THE SETTLE GATE IS LEFT
    // ALONE, A PENDING HOLD STILL APPLIES.
    pub fn config_reset(&mut self) {
        self.down_skip = 0;
        self.momentum_adder = 0;
        self.rate_mult = 1;
    }

    // TRUE WHILE THE TICK MUST STAY SILENT AFTER A LIFECYCLE EVENT.
    // CLEARS ITSELF AFTER SETTLE_TICKS CALLS.
    pub fn settle_pending(&mut self) -> bool {
        if self.check_skip == 0 {
            return false;
        }
        self.check_skip += 1;
        if self.check_skip >= SETTLE_TICKS {
            self.check_skip = 0;
        }
        true
    }

    pub fn start_settle(&mut self) {
        self.check_skip = 1;
    }

    // UP-DECISION MOMENTUM: ACCUMULATE TOWARD max_mom, SCALED BY THE
    // SENSITIVITY. RETURNS THE MOMENTUM TO FOLD INTO THE FACTOR, OR
    // None WHEN THE ADDER IS ALREADY SATURATED.
    pub fn momentum_up(&mut self, max_mom: u32, mom_sens: u32) -> Option<u32> {
        if self.momentum_adder >= mom_sens {
            return None;
        }
        self.momentum_adder += 1;
        Some(self.momentum_adder * max_mom / mom_sens)
    }

    // DECAY TWICE AS FAST AS THE CLIMB
    pub fn momentum_down(&mut self, max_mom: u32, mom_sens: u32) -> Option<u32> {
        if self.momentum_adder <= 1 {
            return None;
        }
        self.momentum_adder -= 2;
        Some(self.momentum_adder * max_mom / mom_sens)
    }
}
