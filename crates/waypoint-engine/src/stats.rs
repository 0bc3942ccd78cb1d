//! Run counters, per-stage timers, and the periodic statistics CSV.

use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::Path;
use std::time::{Duration, Instant};

/// Seconds between statistics-CSV snapshots.
pub const STAT_INTERVAL_S: u64 = 300;

/// Run one closure while accumulating its wall time into a stage meter.
pub fn timed<T>(acc: &mut Duration, f: impl FnOnce() -> T) -> T {
    let started = Instant::now();
    let result = f();
    *acc += started.elapsed();
    result
}

#[derive(Debug, Default)]
pub struct EngineStats {
    pub num_pass: u64,
    pub num_fail: u64,
    pub num_conflict: u64,

    pub time_warmup: Duration,
    pub time_scheduling: Duration,
    pub time_generation_setting: Duration,
    pub time_generation: Duration,
    pub time_running_callback: Duration,
    pub time_result_check: Duration,
    pub time_duplicate_checkdiff: Duration,
    pub time_duplicate_reconstruction: Duration,
    pub time_duplicate_synthesis: Duration,
    pub time_path_check: Duration,
    pub time_path_insert: Duration,
    pub time_condition_evaluation: Duration,
    pub time_synthesis: Duration,
}

/// Everything one snapshot line set needs besides the counters.
pub struct StatSnapshot {
    pub at_s: u64,
    pub num_instrumented: usize,
    pub num_covered: usize,
    pub num_nd: usize,
    pub total_gen: u64,
    pub num_internals: usize,
    pub num_leaves: usize,
    pub total_prefix_length: usize,
    pub num_params: usize,
    pub num_total_inputs: usize,
    pub elapsed_ms: u64,
}

impl EngineStats {
    fn time_duplicate(&self) -> Duration {
        self.time_duplicate_checkdiff
            + self.time_duplicate_reconstruction
            + self.time_duplicate_synthesis
    }

    /// Flat `key,value` lines under a timestamp header.
    pub fn to_csv(&self, snap: &StatSnapshot) -> String {
        let ms = |d: Duration| d.as_millis();
        let mut out = String::new();
        let _ = writeln!(out, "============== {} ==============", snap.at_s);
        let _ = writeln!(out, "Number of instrumented PCs,{}", snap.num_instrumented);
        let _ = writeln!(out, "Number of covered PCs,{}", snap.num_covered);
        let _ = writeln!(out, "Number of nondeterministic PCs,{}", snap.num_nd);
        let _ = writeln!(out, "Number of generation,{}", snap.total_gen);
        let _ = writeln!(
            out,
            "Number of nodes in ACT,{}",
            snap.num_internals + snap.num_leaves
        );
        let _ = writeln!(out, "    Internals,{}", snap.num_internals);
        let _ = writeln!(out, "    Leaves,{}", snap.num_leaves);
        let _ = writeln!(out, "Total prefix length of ACT,{}", snap.total_prefix_length);
        let _ = writeln!(
            out,
            "Total argument size,{}",
            snap.num_params * snap.num_total_inputs
        );
        let _ = writeln!(out, "    Number of arguments,{}", snap.num_params);
        let _ = writeln!(out, "    Total number of input in ACT,{}", snap.num_total_inputs);
        let _ = writeln!(out);
        let _ = writeln!(out, "Number of passed inputs,{}", self.num_pass);
        let _ = writeln!(out, "Number of failed inputs,{}", self.num_fail);
        let _ = writeln!(out);
        let _ = writeln!(out, "Time for warming up(ms),{}", ms(self.time_warmup));
        let _ = writeln!(out, "Time for scheduling(ms),{}", ms(self.time_scheduling));
        let _ = writeln!(
            out,
            "Time for generator setting(ms),{}",
            ms(self.time_generation_setting)
        );
        let _ = writeln!(out, "Time for generation(ms),{}", ms(self.time_generation));
        let _ = writeln!(
            out,
            "Time for running callback(ms),{}",
            ms(self.time_running_callback)
        );
        let _ = writeln!(out, "Time for result check(ms),{}", ms(self.time_result_check));
        let _ = writeln!(
            out,
            "Time for handling duplicate(ms),{}",
            ms(self.time_duplicate())
        );
        let _ = writeln!(out, "    num conflicts,{}", self.num_conflict);
        let _ = writeln!(
            out,
            "    check diff(ms),{}",
            ms(self.time_duplicate_checkdiff)
        );
        let _ = writeln!(
            out,
            "    reconstruction(ms),{}",
            ms(self.time_duplicate_reconstruction)
        );
        let _ = writeln!(
            out,
            "    synthesis(ms),{}",
            ms(self.time_duplicate_synthesis)
        );
        let _ = writeln!(
            out,
            "Time for path check(ms),{}",
            ms(self.time_path_check + self.time_path_insert)
        );
        let _ = writeln!(out, "    check duplicate(ms),{}", ms(self.time_path_check));
        let _ = writeln!(out, "    insert(ms),{}", ms(self.time_path_insert));
        let _ = writeln!(
            out,
            "Time for condition evaluation(ms),{}",
            ms(self.time_condition_evaluation)
        );
        let _ = writeln!(out, "Time for synthesis(ms),{}", ms(self.time_synthesis));
        let _ = writeln!(out, "Total elapsed time(ms),{}", snap.elapsed_ms);
        out
    }

    pub fn append_csv(&self, path: &Path, snap: &StatSnapshot) -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(self.to_csv(snap).as_bytes())
    }
}
