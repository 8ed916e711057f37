// IMPULSE -- DYNAMIC CPUFREQ + CPU HOTPLUG GOVERNOR
// USERSPACE CONTROL LOOP: SAMPLE LOAD, STEP FREQUENCY THROUGH A LOOKUP
// TABLE, PLUG/UNPLUG CORES, SWAP PROFILES ON SUSPEND/RESUME.
//
// LIBRARY CRATE SO THE WHOLE DECISION CORE RUNS OFFLINE IN TESTS
// AGAINST A MOCK HARDWARE PLANE. THE BINARY WIRES IN SYSFS.

pub mod config;
pub mod cpu;
pub mod error;
pub mod event;
pub mod freq_table;
pub mod governor;
pub mod hotplug;
pub mod lcdfreq;
pub mod sampler;
pub mod tuners;
