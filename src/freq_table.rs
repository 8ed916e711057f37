// IMPULSE FREQUENCY TABLE + DECISION ENGINE
// TWO-COLUMN-PAIR LOOKUP TABLE: EVERY ROW KNOWS ITS NEXT STEP UP AND
// DOWN IN TWO SCALING STYLES (NORMAL / POWER). THE POWER COLUMNS TAKE
// BIGGER STEPS SO SUSTAINED HIGH LOAD CLIMBS FASTER.
//
// PURE MODULE: ZERO HARDWARE DEPENDENCIES, TESTABLE OFFLINE.

use crate::error::{GovernorError, Result};

// FAST SCALING TUNABLE ENCODING:
//   0    -> SINGLE-STEP SCALING (NO EXTRA JUMPS)
//   1-4  -> JUMP N EXTRA ROWS, UPSCALING ONLY
//   5-8  -> JUMP N-4 EXTRA ROWS, BOTH DIRECTIONS
pub const MAX_FAST_SCALING: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

// ROW JUMPS APPLIED BEFORE THE COLUMN LOOKUP
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScalingJumps {
    pub up: usize,
    pub down: usize,
}

impl ScalingJumps {
    pub fn from_mode(fast_scaling: u32) -> Self {
        if fast_scaling > 4 {
            Self {
                up: (fast_scaling - 4) as usize,
                down: (fast_scaling - 4) as usize,
            }
        } else {
            Self {
                up: fast_scaling as usize,
                down: 0,
            }
        }
    }
}

// ONE PERFORMANCE LEVEL AND ITS FOUR NEIGHBOR ENTRIES
#[derive(Debug, Clone, Copy)]
pub struct FreqRow {
    pub khz: u32,
    pub up: u32,
    pub down: u32,
    pub power_up: u32,
    pub power_down: u32,
}

const fn row(khz: u32, up: u32, down: u32, power_up: u32, power_down: u32) -> FreqRow {
    FreqRow { khz, up, down, power_up, power_down }
}

// DEFAULT SCALING TABLE, HIGHEST FIRST. NORMAL COLUMNS STEP ONE LEVEL,
// POWER COLUMNS STEP TWO (WIDER NEAR THE BOTTOM WHERE LEVELS ARE COARSE).
pub const BUILTIN_TABLE: [FreqRow; 17] = [
    row(1_800_000, 1_800_000, 1_700_000, 1_800_000, 1_700_000),
    row(1_700_000, 1_800_000, 1_600_000, 1_800_000, 1_600_000),
    row(1_600_000, 1_700_000, 1_500_000, 1_800_000, 1_500_000),
    row(1_500_000, 1_600_000, 1_400_000, 1_700_000, 1_400_000),
    row(1_400_000, 1_500_000, 1_300_000, 1_600_000, 1_300_000),
    row(1_300_000, 1_400_000, 1_200_000, 1_500_000, 1_200_000),
    row(1_200_000, 1_300_000, 1_100_000, 1_400_000, 1_100_000),
    row(1_100_000, 1_200_000, 1_000_000, 1_300_000, 1_000_000),
    row(1_000_000, 1_100_000, 900_000, 1_200_000, 900_000),
    row(900_000, 1_000_000, 800_000, 1_100_000, 800_000),
    row(800_000, 900_000, 700_000, 1_000_000, 700_000),
    row(700_000, 800_000, 600_000, 900_000, 600_000),
    row(600_000, 700_000, 400_000, 800_000, 500_000),
    row(500_000, 600_000, 300_000, 700_000, 400_000),
    row(400_000, 500_000, 200_000, 600_000, 300_000),
    row(300_000, 400_000, 200_000, 500_000, 200_000),
    row(200_000, 300_000, 200_000, 400_000, 200_000),
];

pub struct FreqTable {
    rows: Vec<FreqRow>,
}

impl FreqTable {
    // INVARIANT: STRICTLY DECREASING khz, INDEX 0 IS THE MAXIMUM LEVEL
    pub fn new(rows: Vec<FreqRow>) -> Result<Self> {
        if rows.is_empty() {
            return Err(GovernorError::InvalidInput("empty frequency table"));
        }
        for pair in rows.windows(2) {
            if pair[1].khz >= pair[0].khz {
                return Err(GovernorError::InvalidInput(
                    "frequency table must be strictly decreasing",
                ));
            }
        }
        Ok(Self { rows })
    }

    pub fn builtin() -> Self {
        Self { rows: BUILTIN_TABLE.to_vec() }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn last_index(&self) -> usize {
        self.rows.len() - 1
    }

    pub fn khz_at(&self, idx: usize) -> u32 {
        self.rows[idx.min(self.last_index())].khz
    }

    pub fn min_khz(&self) -> u32 {
        self.rows[self.last_index()].khz
    }

    // FULL-TABLE SEARCH, USED BY LIMIT HANDLING
    pub fn index_of(&self, khz: u32) -> Option<usize> {
        self.rows.iter().position(|r| r.khz == khz)
    }

    // BOUNDED SEARCH: STARTS AT THE SOFT LIMIT SO LEVELS ABOVE THE
    // ACTIVE CAP ARE NEVER MATCHED
    fn index_from(&self, start: usize, khz: u32) -> Option<usize> {
        self.rows[start.min(self.last_index())..]
            .iter()
            .position(|r| r.khz == khz)
            .map(|p| p + start)
    }

    // SHARED CLAMP FOR BOTH JUMP DIRECTIONS
    fn clamp_index(&self, idx: isize, floor: usize) -> usize {
        let ceil = self.last_index() as isize;
        idx.clamp(floor as isize, ceil) as usize
    }

    // DECIDE THE NEXT LEVEL. PURE WITH RESPECT TO HARDWARE -- THE CALLER
    // COMMITS THE RESULT VIA set_level.
    //
    // None MEANS THE CURRENT LEVEL IS NOT IN THE (CAPPED) TABLE, WHICH
    // HAPPENS AFTER AN EXTERNAL LIMIT CHANGE LANDS ON AN UNLISTED VALUE.
    // THAT IS A HOLD, NOT AN ERROR.
    pub fn next_level(
        &self,
        current_khz: u32,
        direction: Direction,
        load: u32,
        smooth_up: u32,
        jumps: ScalingJumps,
        soft_limit_idx: usize,
    ) -> Option<u32> {
        let i = self.index_from(soft_limit_idx, current_khz)? as isize;

        let idx = match direction {
            Direction::Up => self.clamp_index(i - jumps.up as isize, soft_limit_idx),
            Direction::Down => self.clamp_index(i + jumps.down as isize, soft_limit_idx),
        };

        let row = &self.rows[idx];
        let power = load >= smooth_up;
        let khz = match (direction, power) {
            (Direction::Up, false) => row.up,
            (Direction::Up, true) => row.power_up,
            (Direction::Down, false) => row.down,
            (Direction::Down, true) => row.power_down,
        };

        // NEVER REQUEST ABOVE THE ACTIVE SOFT CAP
        Some(khz.min(self.khz_at(soft_limit_idx)))
    }
}

impl Default for FreqTable {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_table_is_strictly_decreasing() {
        let t = FreqTable::builtin();
        for pair in BUILTIN_TABLE.windows(2) {
            assert!(pair[1].khz < pair[0].khz);
        }
        assert_eq!(t.khz_at(0), 1_800_000);
        assert_eq!(t.min_khz(), 200_000);
    }

    #[test]
    fn rejects_non_monotonic_table() {
        let rows = vec![row(500_000, 500_000, 400_000, 500_000, 400_000),
                        row(600_000, 600_000, 500_000, 600_000, 500_000)];
        assert!(FreqTable::new(rows).is_err());
    }

    #[test]
    fn jump_derivation() {
        assert_eq!(ScalingJumps::from_mode(0), ScalingJumps { up: 0, down: 0 });
        assert_eq!(ScalingJumps::from_mode(3), ScalingJumps { up: 3, down: 0 });
        assert_eq!(ScalingJumps::from_mode(5), ScalingJumps { up: 1, down: 1 });
        assert_eq!(ScalingJumps::from_mode(8), ScalingJumps { up: 4, down: 4 });
    }

    #[test]
    fn normal_column_up_step() {
        // LOAD BELOW smooth_up: ONE NORMAL UP-STEP FROM 1000000
        let t = FreqTable::builtin();
        let next = t.next_level(1_000_000, Direction::Up, 70, 75, ScalingJumps::from_mode(0), 0);
        assert_eq!(next, Some(1_100_000));
    }

    #[test]
    fn power_column_up_step() {
        // LOAD AT/ABOVE smooth_up: POWER COLUMN TAKES THE WIDER STEP
        let t = FreqTable::builtin();
        let next = t.next_level(1_000_000, Direction::Up, 90, 75, ScalingJumps::from_mode(0), 0);
        assert_eq!(next, Some(1_200_000));
    }

    #[test]
    fn fast_scaling_jumps_rows_before_column_read() {
        // MODE 6 -> 2 ROW JUMPS BOTH WAYS. FROM INDEX 8 THE UP LOOKUP
        // LANDS ON INDEX 6 AND READS ITS COLUMNS.
        let t = FreqTable::builtin();
        let jumps = ScalingJumps::from_mode(6);
        assert_eq!(t.next_level(1_000_000, Direction::Up, 70, 75, jumps, 0), Some(1_300_000));
        assert_eq!(t.next_level(1_000_000, Direction::Up, 90, 75, jumps, 0), Some(1_400_000));
        assert_eq!(t.next_level(1_000_000, Direction::Down, 40, 75, jumps, 0), Some(700_000));
    }

    #[test]
    fn lookup_miss_is_a_hold() {
        let t = FreqTable::builtin();
        assert_eq!(t.next_level(1_234_567, Direction::Up, 90, 75, ScalingJumps::default(), 0), None);
    }

    #[test]
    fn soft_limit_bounds_search_and_result() {
        let t = FreqTable::builtin();
        // SOFT CAP AT INDEX 4 (1400000): A LEVEL ABOVE THE CAP IS NOT FOUND
        assert_eq!(t.next_level(1_600_000, Direction::Up, 90, 75, ScalingJumps::default(), 4), None);
        // UP FROM THE CAP ITSELF STAYS AT THE CAP
        assert_eq!(t.next_level(1_400_000, Direction::Up, 90, 75, ScalingJumps::default(), 4), Some(1_400_000));
    }

    #[test]
    fn down_clamps_at_table_end() {
        let t = FreqTable::builtin();
        let jumps = ScalingJumps::from_mode(8); // 4-ROW DOWN JUMPS
        assert_eq!(t.next_level(300_000, Direction::Down, 10, 75, jumps, 0), Some(200_000));
        assert_eq!(t.next_level(200_000, Direction::Down, 10, 75, jumps, 0), Some(200_000));
    }

    #[test]
    fn decide_never_leaves_the_valid_range() {
        // FOR EVERY LEVEL, LOAD, DIRECTION AND JUMP MODE THE RESULT STAYS
        // WITHIN [TABLE MIN, SOFT CAP]
        let t = FreqTable::builtin();
        for soft in [0usize, 3, 8] {
            let cap = t.khz_at(soft);
            for mode in 0..=MAX_FAST_SCALING {
                let jumps = ScalingJumps::from_mode(mode);
                for i in 0..t.len() {
                    let cur = t.khz_at(i);
                    for load in (0..=100).step_by(10) {
                        for dir in [Direction::Up, Direction::Down] {
                            if let Some(next) = t.next_level(cur, dir, load, 75, jumps, soft) {
                                assert!(next <= cap, "above soft cap: {} > {}", next, cap);
                                assert!(next >= t.min_khz());
                            }
                        }
                    }
                }
            }
        }
    }
}
