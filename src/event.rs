// IMPULSE EVENT LOG
// RECORDS STATS SNAPSHOTS DURING GOVERNOR EXECUTION
// PRE-ALLOCATED RING BUFFER. NO HEAP ALLOCATION DURING MONITORING.
// WRAPS AROUND AT CAPACITY -- OLDEST ENTRIES OVERWRITTEN.

const MAX_SNAPSHOTS: usize = 8192;

#[derive(Clone, Copy)]
pub struct Snapshot {
    pub ts_ns:          u64,
    pub load:           u64,
    pub freq_khz:       u64,
    pub online:         u64,
    pub up_decisions:   u64,
    pub down_decisions: u64,
    pub hotplug_events: u64,
}

pub struct EventLog {
    snapshots: Vec<Snapshot>,
    head:      usize,
    len:       usize,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            snapshots: vec![
                Snapshot { ts_ns: 0, load: 0, freq_khz: 0, online: 0,
                           up_decisions: 0, down_decisions: 0, hotplug_events: 0 };
                MAX_SNAPSHOTS
            ],
            head: 0,
            len: 0,
        }
    }

    // RECORD ONE STATS SNAPSHOT. CALLED ONCE PER SECOND FROM THE MONITOR LOOP.
    // OVERWRITES OLDEST ENTRY WHEN FULL.
    pub fn snapshot(&mut self, load: u64, freq_khz: u64, online: u64,
                    up_decisions: u64, down_decisions: u64, hotplug_events: u64) {
        self.snapshots[self.head] = Snapshot {
            ts_ns: now_ns(),
            load,
            freq_khz,
            online,
            up_decisions,
            down_decisions,
            hotplug_events,
        };
        self.head = (self.head + 1) % MAX_SNAPSHOTS;
        if self.len < MAX_SNAPSHOTS {
            self.len += 1;
        }
    }

    // ITERATE SNAPSHOTS IN CHRONOLOGICAL ORDER
    fn iter_chronological(&self) -> impl Iterator<Item = &Snapshot> {
        let start = if self.len < MAX_SNAPSHOTS { 0 } else { self.head };
        (0..self.len).map(move |i| {
            &self.snapshots[(start + i) % MAX_SNAPSHOTS]
        })
    }

    // DUMP THE TIME SERIES AFTER EXECUTION
    pub fn dump(&self) {
        if self.len == 0 {
            return;
        }

        let mut iter = self.iter_chronological();
        let first = iter.next().unwrap();
        let base_ts = first.ts_ns;

        println!("\n{:<10} {:<8} {:<10} {:<8} {:<8} {:<8} {:<8}",
            "TIME_S", "LOAD%", "FREQ_KHZ", "ONLINE", "UP/S", "DOWN/S", "PLUG/S");
        println!("{}", "-".repeat(64));

        // PRINT FIRST ENTRY
        println!("{:<10.1} {:<8} {:<10} {:<8} {:<8} {:<8} {:<8}",
            0.0, first.load, first.freq_khz, first.online,
            first.up_decisions, first.down_decisions, first.hotplug_events);

        for s in iter {
            let elapsed_s = (s.ts_ns - base_ts) as f64 / 1_000_000_000.0;
            println!("{:<10.1} {:<8} {:<10} {:<8} {:<8} {:<8} {:<8}",
                elapsed_s, s.load, s.freq_khz, s.online,
                s.up_decisions, s.down_decisions, s.hotplug_events);
        }

        if self.len == MAX_SNAPSHOTS {
            println!("\n(RING BUFFER WRAPPED -- SHOWING MOST RECENT {} SNAPSHOTS)", MAX_SNAPSHOTS);
        }
        println!("TOTAL SNAPSHOTS: {}", self.len);
    }

    // SUMMARY STATISTICS
    pub fn summary(&self) {
        if self.len < 2 {
            return;
        }

        let snapshots: Vec<&Snapshot> = self.iter_chronological().collect();

        let total_up: u64 = snapshots.iter().map(|s| s.up_decisions).sum();
        let total_down: u64 = snapshots.iter().map(|s| s.down_decisions).sum();
        let total_plug: u64 = snapshots.iter().map(|s| s.hotplug_events).sum();

        let peak_load = snapshots.iter().map(|s| s.load).max().unwrap_or(0);
        let avg_load: u64 = snapshots.iter().map(|s| s.load).sum::<u64>() / self.len as u64;
        let peak_freq = snapshots.iter().map(|s| s.freq_khz).max().unwrap_or(0);
        let min_freq = snapshots.iter().map(|s| s.freq_khz).min().unwrap_or(0);

        let elapsed_ns = snapshots.last().unwrap().ts_ns - snapshots.first().unwrap().ts_ns;
        let elapsed_s = elapsed_ns as f64 / 1_000_000_000.0;

        println!("\n{}", "=".repeat(50));
        println!("IMPULSE SUMMARY");
        println!("{}", "=".repeat(50));
        println!("  AVG LOAD:          {}%", avg_load);
        println!("  PEAK LOAD:         {}%", peak_load);
        println!("  FREQ RANGE:        {} - {} KHZ", min_freq, peak_freq);
        println!("  UP DECISIONS:      {}", total_up);
        println!("  DOWN DECISIONS:    {}", total_down);
        println!("  HOTPLUG EVENTS:    {}", total_plug);
        if elapsed_s > 0.0 {
            println!("  DECISIONS/S:       {:.1}",
                (total_up + total_down) as f64 / elapsed_s);
        }
        println!("  ELAPSED:           {:.1}s", elapsed_s);
        println!("  SAMPLES:           {}", self.len);
    }
}

fn now_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    (ts.tv_sec as u64) * 1_000_000_000 + (ts.tv_nsec as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_records() {
        let mut log = EventLog::new();
        assert_eq!(log.len, 0);

        log.snapshot(42, 1_000_000, 2, 5, 3, 1);
        assert_eq!(log.len, 1);
        assert_eq!(log.snapshots[0].load, 42);
        assert_eq!(log.snapshots[0].freq_khz, 1_000_000);
        assert_eq!(log.snapshots[0].online, 2);
        assert_eq!(log.snapshots[0].up_decisions, 5);
        assert_eq!(log.snapshots[0].down_decisions, 3);
        assert_eq!(log.snapshots[0].hotplug_events, 1);
        assert!(log.snapshots[0].ts_ns > 0);
    }

    #[test]
    fn ring_buffer_wraps() {
        let mut log = EventLog::new();

        // FILL TO CAPACITY
        for i in 0..MAX_SNAPSHOTS {
            log.snapshot(i as u64, 0, 0, 0, 0, 0);
        }
        assert_eq!(log.len, MAX_SNAPSHOTS);
        assert_eq!(log.head, 0); // WRAPPED BACK TO START

        // WRITE ONE MORE -- OVERWRITES OLDEST
        log.snapshot(9999, 0, 0, 0, 0, 0);
        assert_eq!(log.len, MAX_SNAPSHOTS);
        assert_eq!(log.head, 1);
        assert_eq!(log.snapshots[0].load, 9999);

        // CHRONOLOGICAL ITERATION STARTS FROM OLDEST (INDEX 1)
        let ordered: Vec<u64> = log.iter_chronological()
            .map(|s| s.load)
            .collect();
        assert_eq!(ordered[0], 1); // OLDEST SURVIVING ENTRY
        assert_eq!(*ordered.last().unwrap(), 9999); // NEWEST
        assert_eq!(ordered.len(), MAX_SNAPSHOTS);
    }

    #[test]
    fn summary_no_panic_empty() {
        let log = EventLog::new();
        log.summary(); // SHOULD NOT PANIC WITH 0 SNAPSHOTS
    }

    #[test]
    fn summary_no_panic_one() {
        let mut log = EventLog::new();
        log.snapshot(50, 800_000, 4, 1, 1, 0);
        log.summary(); // SHOULD NOT PANIC WITH 1 SNAPSHOT
    }

    #[test]
    fn dump_no_panic() {
        let mut log = EventLog::new();
        log.snapshot(50, 800_000, 4, 1, 1, 0);
        log.snapshot(80, 1_400_000, 4, 3, 0, 1);
        log.dump(); // SHOULD NOT PANIC
    }
}
