// IMPULSE HOTPLUG POLICY
// TWO PURE SCANS OVER THE DOMAIN LOAD AND THE ONLINE MAP. UNIT 0 IS
// NEVER TOUCHED. THE UP-SCAN RUNS ON EVERY DECIDING TICK; THE
// DOWN-SCAN ONLY ON TICKS THAT DID NOT TAKE THE UP PATH, SO A BOOST
// NEVER PARKS THE UNIT IT IS ABOUT TO NEED.

use crate::tuners::{Tuners, MAX_EXTRA_UNITS};

fn managed_range(online: &[bool]) -> std::ops::RangeInclusive<usize> {
    1..=MAX_EXTRA_UNITS.min(online.len().saturating_sub(1))
}

// LOWEST MANAGED OFFLINE UNIT WHOSE THRESHOLD THE LOAD EXCEEDS.
// A ZERO THRESHOLD PARKS THAT UNIT. online[k] IS THE CURRENT STATE OF
// UNIT k; SLOTS PAST online.len() DO NOT EXIST ON THIS MACHINE.
pub fn up_candidate(load: u32, online: &[bool], tuners: &Tuners) -> Option<usize> {
    if tuners.disable_hotplug {
        return None;
    }
    if online.iter().all(|&o| o) {
        return None;
    }
    for k in managed_range(online) {
        let thr = tuners.up_threshold_hotplug[k - 1];
        if thr != 0 && load > thr && !online[k] {
            return Some(k);
        }
    }
    None
}

// HIGHEST MANAGED ONLINE UNIT WHOSE THRESHOLD THE LOAD UNDERCUTS,
// NEVER THE LAST ONLINE UNIT
pub fn down_candidate(load: u32, online: &[bool], tuners: &Tuners) -> Option<usize> {
    if tuners.disable_hotplug {
        return None;
    }
    if online.iter().filter(|&&o| o).count() <= 1 {
        return None;
    }
    for k in managed_range(online).rev() {
        if online[k] && load < tuners.down_threshold_hotplug[k - 1] {
            return Some(k);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuners() -> Tuners {
        Tuners::default() // UP 68/68/68, DOWN 55/55/55
    }

    #[test]
    fn high_load_enables_the_lowest_offline_unit() {
        assert_eq!(up_candidate(80, &[true, false, false, false], &tuners()), Some(1));

        // UNIT 1 ALREADY ON: NEXT IN LINE COMES UP
        assert_eq!(up_candidate(80, &[true, true, false, false], &tuners()), Some(2));
    }

    #[test]
    fn up_threshold_is_strict() {
        assert_eq!(up_candidate(68, &[true, false, false, false], &tuners()), None);
        assert_eq!(up_candidate(69, &[true, false, false, false], &tuners()), Some(1));
    }

    #[test]
    fn no_enable_when_everything_is_online() {
        assert_eq!(up_candidate(100, &[true, true, true, true], &tuners()), None);
    }

    #[test]
    fn zero_threshold_parks_a_unit() {
        let mut t = tuners();
        t.up_threshold_hotplug[0] = 0;
        // UNIT 1 IS PARKED, UNIT 2 TAKES THE SLOT
        assert_eq!(up_candidate(95, &[true, false, false, false], &t), Some(2));
    }

    #[test]
    fn low_load_disables_the_highest_online_unit() {
        assert_eq!(down_candidate(30, &[true, true, true, true], &tuners()), Some(3));
        assert_eq!(down_candidate(30, &[true, true, true, false], &tuners()), Some(2));
    }

    #[test]
    fn unit_zero_is_never_disabled() {
        assert_eq!(down_candidate(0, &[true, false, false, false], &tuners()), None);
    }

    #[test]
    fn scans_name_candidates_independently() {
        // UNIT 1 QUALIFIES FOR ENABLE AT THE SAME LOAD UNIT 3
        // QUALIFIES FOR DISABLE; WHICH ONE RUNS IS THE TICK'S CALL
        let mut t = tuners();
        t.up_threshold_hotplug = [60, 0, 0];
        t.down_threshold_hotplug = [30, 30, 70];
        let online = [true, false, false, true];
        assert_eq!(up_candidate(65, &online, &t), Some(1));
        assert_eq!(down_candidate(65, &online, &t), Some(3));
    }

    #[test]
    fn disable_hotplug_holds_everything() {
        let mut t = tuners();
        t.disable_hotplug = true;
        assert_eq!(up_candidate(100, &[true, false, false, false], &t), None);
        assert_eq!(down_candidate(0, &[true, true, true, true], &t), None);
    }

    #[test]
    fn small_machines_only_consider_existing_units() {
        assert_eq!(up_candidate(90, &[true, false], &tuners()), Some(1));
        assert_eq!(down_candidate(10, &[true, true], &tuners()), Some(1));
    }
}
