// IMPULSE HARDWARE PLANE
// THE SEAM BETWEEN THE DECISION CORE AND THE MACHINE. EVERYTHING THE
// GOVERNOR TOUCHES GOES THROUGH CpuPlane, SO TESTS RUN THE FULL LOOP
// AGAINST A MOCK AND THE BINARY WIRES IN /proc + SYSFS.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::sampler::UnitSample;

// HOW A REQUESTED LEVEL SNAPS TO THE HARDWARE'S DISCRETE LEVELS:
// AtMost PICKS THE HIGHEST LEVEL NOT ABOVE THE TARGET (UP-SCALING AND
// MAX-LIMIT CLAMPS), AtLeast THE LOWEST NOT BELOW IT (DOWN-SCALING
// AND MIN-LIMIT CLAMPS).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    AtLeast,
    AtMost,
}

pub type LevelListener = Box<dyn Fn(u32) + Send + Sync>;

pub trait CpuPlane: Send + Sync {
    fn possible_count(&self) -> usize;
    fn online_count(&self) -> usize;
    fn is_unit_enabled(&self, unit: usize) -> bool;
    fn enable_unit(&self, unit: usize) -> bool;
    fn disable_unit(&self, unit: usize) -> bool;

    // None ON A READ FAILURE; THE TICK TREATS IT AS A GLITCH
    fn sample_utilization(&self, unit: usize) -> Option<UnitSample>;

    // COMMITS A LEVEL AND RETURNS WHAT THE HARDWARE ACTUALLY TOOK
    fn set_level(&self, khz: u32, relation: Relation) -> u32;
    fn current_level(&self) -> u32;
    fn transition_latency_us(&self) -> u32;

    // OUT-OF-BAND LEVEL CHANGES (THERMAL, FIRMWARE). PLANES WITHOUT A
    // NOTIFICATION SOURCE LEAVE THE DEFAULTS.
    fn register_level_listener(&self, _listener: LevelListener) {}
    fn clear_level_listener(&self) {}
}

// SNAP A TARGET TO A DISCRETE LEVEL LIST (ASCENDING KHZ)
pub fn snap_level(levels: &[u32], khz: u32, relation: Relation) -> u32 {
    match relation {
        Relation::AtMost => levels
            .iter()
            .rev()
            .find(|&&l| l <= khz)
            .or_else(|| levels.first())
            .copied()
            .unwrap_or(khz),
        Relation::AtLeast => levels
            .iter()
            .find(|&&l| l >= khz)
            .or_else(|| levels.last())
            .copied()
            .unwrap_or(khz),
    }
}

// REAL MACHINE: /proc/stat COUNTERS, sysfs cpufreq + HOTPLUG KNOBS.
// LEVEL CONTROL RIDES THE userspace SCALING GOVERNOR OF UNIT 0'S
// POLICY.
pub struct SysfsCpu {
    cpu_root: PathBuf,
    proc_stat: PathBuf,
    levels: Vec<u32>,
    possible: usize,
    latency_us: u32,
    usec_per_tick: u64,
    requested: Mutex<u32>,
}

impl SysfsCpu {
    pub fn new() -> anyhow::Result<Self> {
        Self::at(Path::new("/sys/devices/system/cpu"), Path::new("/proc/stat"))
    }

    pub fn at(cpu_root: &Path, proc_stat: &Path) -> anyhow::Result<Self> {
        let policy = cpu_root.join("cpu0/cpufreq");
        let levels = read_levels(&policy.join("scaling_available_frequencies"))?;
        let possible = count_units(cpu_root);
        let latency_us = read_u64(&policy.join("cpuinfo_transition_latency"))
            .map(|ns| (ns / 1_000) as u32)
            .unwrap_or(0);
        let hz = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        if hz <= 0 {
            anyhow::bail!("sysconf(_SC_CLK_TCK) failed");
        }
        let cur = read_u64(&policy.join("scaling_cur_freq")).unwrap_or(0) as u32;
        Ok(Self {
            cpu_root: cpu_root.to_path_buf(),
            proc_stat: proc_stat.to_path_buf(),
            levels,
            possible,
            latency_us,
            usec_per_tick: 1_000_000 / hz as u64,
            requested: Mutex::new(cur),
        })
    }

    fn policy_file(&self, name: &str) -> PathBuf {
        self.cpu_root.join("cpu0/cpufreq").join(name)
    }

    fn online_file(&self, unit: usize) -> PathBuf {
        self.cpu_root.join(format!("cpu{}/online", unit))
    }
}

impl CpuPlane for SysfsCpu {
    fn possible_count(&self) -> usize {
        self.possible
    }

    fn online_count(&self) -> usize {
        (0..self.possible).filter(|&u| self.is_unit_enabled(u)).count()
    }

    fn is_unit_enabled(&self, unit: usize) -> bool {
        if unit == 0 {
            // UNIT 0 HAS NO online KNOB, IT IS ALWAYS UP
            return true;
        }
        matches!(read_u64(&self.online_file(unit)), Some(1))
    }

    fn enable_unit(&self, unit: usize) -> bool {
        unit != 0 && write_str(&self.online_file(unit), "1")
    }

    fn disable_unit(&self, unit: usize) -> bool {
        unit != 0 && write_str(&self.online_file(unit), "0")
    }

    fn sample_utilization(&self, unit: usize) -> Option<UnitSample> {
        let stat = fs::read_to_string(&self.proc_stat).ok()?;
        let tag = format!("cpu{} ", unit);
        let line = stat.lines().find(|l| l.starts_with(&tag))?;
        let ticks: Vec<u64> = line
            .split_whitespace()
            .skip(1)
            .filter_map(|f| f.parse().ok())
            .collect();
        // user nice system idle iowait irq softirq ...
        if ticks.len() < 5 {
            return None;
        }
        let wall: u64 = ticks.iter().sum();
        let idle = ticks[3] + ticks[4];
        Some(UnitSample {
            idle_us: idle * self.usec_per_tick,
            wall_us: wall * self.usec_per_tick,
            nice_us: ticks[1] * self.usec_per_tick,
        })
    }

    fn set_level(&self, khz: u32, relation: Relation) -> u32 {
        let target = snap_level(&self.levels, khz, relation);
        if write_str(&self.policy_file("scaling_setspeed"), &target.to_string()) {
            *self.requested.lock().unwrap() = target;
        }
        target
    }

    fn current_level(&self) -> u32 {
        read_u64(&self.policy_file("scaling_cur_freq"))
            .map(|v| v as u32)
            .unwrap_or_else(|| *self.requested.lock().unwrap())
    }

    fn transition_latency_us(&self) -> u32 {
        self.latency_us
    }
}

fn count_units(cpu_root: &Path) -> usize {
    // cpu0 ALWAYS EXISTS; PROBE UPWARD UNTIL THE DIRECTORY STOPS
    let mut n = 1;
    while cpu_root.join(format!("cpu{}", n)).is_dir() {
        n += 1;
    }
    n
}

fn read_u64(path: &Path) -> Option<u64> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn read_levels(path: &Path) -> anyhow::Result<Vec<u32>> {
    let raw = fs::read_to_string(path)?;
    let mut levels: Vec<u32> = raw
        .split_whitespace()
        .filter_map(|f| f.parse().ok())
        .collect();
    if levels.is_empty() {
        anyhow::bail!("no scaling levels listed in {}", path.display());
    }
    levels.sort_unstable();
    levels.dedup();
    Ok(levels)
}

fn write_str(path: &Path, value: &str) -> bool {
    fs::OpenOptions::new()
        .write(true)
        .open(path)
        .and_then(|mut f| f.write_all(value.as_bytes()))
        .is_ok()
}
