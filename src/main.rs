// IMPULSE v1.0.0 -- DYNAMIC CPUFREQ + CPU HOTPLUG GOVERNOR
// ADAPTIVE FREQUENCY SCALING FOR LINUX
//
// SCALING DECISIONS RUN ON A DEDICATED TICK THREAD AGAINST /proc + SYSFS
// THE MAIN THREAD HANDLES: CONFIGURATION, SIGNALS, MONITORING, REPORTING

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use impulse::config::ConfigStore;
use impulse::cpu::{CpuPlane, SysfsCpu};
use impulse::event::EventLog;
use impulse::freq_table::FreqTable;
use impulse::governor::{Governor, LimitsOutcome};
use impulse::tuners::Tuners;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);
// SIGUSR1 = DISPLAY OFF, SIGUSR2 = DISPLAY ON
static SUSPEND_REQ: AtomicBool = AtomicBool::new(false);
static RESUME_REQ: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigusr1(_: libc::c_int) {
    SUSPEND_REQ.store(true, Ordering::Relaxed);
}

extern "C" fn on_sigusr2(_: libc::c_int) {
    RESUME_REQ.store(true, Ordering::Relaxed);
}

#[derive(Parser)]
#[command(name = "impulse")]
#[command(about = "IMPULSE -- ADAPTIVE CPUFREQ + HOTPLUG GOVERNOR")]
struct Cli {
    // SAMPLING INTERVAL IN MICROSECONDS (FLOORED BY HARDWARE LATENCY)
    #[arg(long, default_value_t = 100_000)]
    sampling_rate_us: u32,

    // LOAD PERCENT ABOVE WHICH FREQUENCY STEPS UP
    #[arg(long, default_value_t = 70)]
    up_threshold: u32,

    // LOAD PERCENT BELOW WHICH FREQUENCY STEPS DOWN
    #[arg(long, default_value_t = 52)]
    down_threshold: u32,

    // EXTRA TABLE ROWS PER JUMP: 0 NONE, 1-4 UP ONLY, 5-8 BOTH WAYS
    #[arg(long, default_value_t = 0)]
    fast_scaling: u32,

    // SOFT FREQUENCY CAP IN KHZ (0 = NO CAP, MUST BE A TABLE LEVEL)
    #[arg(long, default_value_t = 0)]
    freq_limit_khz: u32,

    // SAMPLING DOWN MOMENTUM CAP (0 = MOMENTUM OFF)
    #[arg(long, default_value_t = 0)]
    sampling_down_max_momentum: u32,

    // SCALE UP EARLY ON A STEEP LOAD GRADIENT
    #[arg(long)]
    early_demand: bool,

    // KEEP ALL UNITS ONLINE, SKIP HOTPLUG DECISIONS
    #[arg(long)]
    disable_hotplug: bool,

    // COUNT nice TIME AS IDLE
    #[arg(long)]
    ignore_nice_load: bool,

    // PRINT VERBOSE OUTPUT
    #[arg(long)]
    verbose: bool,

    // DUMP FULL EVENT LOG ON EXIT
    #[arg(long)]
    dump_log: bool,
}

fn build_tuners(cli: &Cli, table: &FreqTable, cfg: &ConfigStore) -> Result<()> {
    cfg.update_tuners(|t| {
        t.set_thresholds(cli.up_threshold, cli.down_threshold)?;
        t.set_fast_scaling(cli.fast_scaling)?;
        t.set_early_demand(cli.early_demand);
        Ok(())
    })
    .context("bad threshold configuration")?;
    if cli.sampling_down_max_momentum != 0 {
        cfg.set_sampling_down_max_momentum(cli.sampling_down_max_momentum)
            .context("bad momentum configuration")?;
    }
    if cli.freq_limit_khz != 0 {
        cfg.set_freq_limit(table, cli.freq_limit_khz)
            .context("freq limit is not a table level")?;
    }
    cfg.set_ignore_nice_load(cli.ignore_nice_load);
    cfg.set_disable_hotplug(cli.disable_hotplug);
    Ok(())
}

fn read_policy_khz(name: &str) -> Option<u32> {
    std::fs::read_to_string(format!("/sys/devices/system/cpu/cpu0/cpufreq/{}", name))
        .ok()?
        .trim()
        .parse()
        .ok()
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    ctrlc::set_handler(move || {
        SHUTDOWN.store(true, Ordering::Relaxed);
    })?;
    unsafe {
        libc::signal(libc::SIGUSR1, on_sigusr1 as libc::sighandler_t);
        libc::signal(libc::SIGUSR2, on_sigusr2 as libc::sighandler_t);
    }

    let plane = Arc::new(SysfsCpu::new().context("cpufreq sysfs not available")?);
    let table = Arc::new(FreqTable::builtin());
    let cfg = Arc::new(ConfigStore::new({
        let mut t = Tuners::default();
        t.set_sampling_rate_us(cli.sampling_rate_us, 0);
        t
    }));
    build_tuners(&cli, &table, &cfg)?;

    let policy_min = read_policy_khz("scaling_min_freq").unwrap_or_else(|| table.min_khz());
    let mut policy_max = read_policy_khz("scaling_max_freq").unwrap_or_else(|| table.khz_at(0));

    println!("IMPULSE v1.0.0");
    println!("UNITS:           {} ({} online)", plane.possible_count(), plane.online_count());
    println!("POLICY:          {} - {} KHZ", policy_min, policy_max);
    println!("THRESHOLDS:      UP {}% / DOWN {}%", cli.up_threshold, cli.down_threshold);
    println!("FAST SCALING:    {}", cli.fast_scaling);
    println!("EARLY DEMAND:    {}", cli.early_demand);
    println!("HOTPLUG:         {}", if cli.disable_hotplug { "disabled" } else { "enabled" });
    if cli.freq_limit_khz != 0 {
        println!("FREQ LIMIT:      {} KHZ", cli.freq_limit_khz);
    }
    println!();

    let mut governor = Governor::new(
        Arc::clone(&cfg),
        Arc::clone(&table),
        plane.clone() as Arc<dyn CpuPlane>,
        None,
    );
    governor.on_start(policy_min, policy_max)?;
    let stats = governor.stats();
    let mut log = EventLog::new();

    println!("IMPULSE IS ACTIVE (CTRL+C TO EXIT, SIGUSR1/SIGUSR2 = SLEEP/WAKE)");

    let mut prev_up = 0u64;
    let mut prev_down = 0u64;
    let mut prev_plug = 0u64;

    while !SHUTDOWN.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_secs(1));

        if SUSPEND_REQ.swap(false, Ordering::Relaxed) {
            if governor.suspend() {
                println!("SLEEP PROFILE ACTIVE");
            }
        }
        if RESUME_REQ.swap(false, Ordering::Relaxed) {
            if governor.resume() {
                println!("AWAKE PROFILE RESTORED");
            }
        }

        // THE HOST POLICY CAN MOVE UNDERNEATH US (THERMAL CAPS).
        // A DEFERRED EVENT LEAVES policy_max UNCHANGED, SO THE NEXT
        // PASS RETRIES IT.
        if let Some(max) = read_policy_khz("scaling_max_freq") {
            if max != policy_max {
                if governor.on_limits_changed(policy_min, max)? == LimitsOutcome::Applied {
                    policy_max = max;
                }
            }
        }

        let up = stats.up_decisions.load(Ordering::Relaxed);
        let down = stats.down_decisions.load(Ordering::Relaxed);
        let plug = stats.hotplug_enables.load(Ordering::Relaxed)
            + stats.hotplug_disables.load(Ordering::Relaxed);
        let glitch = stats.glitches.load(Ordering::Relaxed);
        let load = stats.last_load.load(Ordering::Relaxed);
        let freq = plane.current_level() as u64;
        let online = plane.online_count() as u64;

        let delta_up = up - prev_up;
        let delta_down = down - prev_down;
        let delta_plug = plug - prev_plug;

        println!(
            "load: {:<4} freq: {:<9} online: {:<3} up/s: {:<4} down/s: {:<4} plug/s: {:<4}",
            load, freq, online, delta_up, delta_down, delta_plug
        );
        if cli.verbose {
            println!(
                "  TOTAL ticks={} up={} down={} plug={} glitches={} deferred={}",
                stats.ticks.load(Ordering::Relaxed),
                up,
                down,
                plug,
                glitch,
                stats.deferred_limit_events.load(Ordering::Relaxed)
            );
        }

        log.snapshot(load, freq, online, delta_up, delta_down, delta_plug);

        prev_up = up;
        prev_down = down;
        prev_plug = plug;
    }

    println!("IMPULSE IS SHUTTING DOWN");
    governor.on_stop()?;

    if cli.dump_log {
        log.dump();
    }
    log.summary();

    println!("IMPULSE OUT.");
    Ok(())
}
