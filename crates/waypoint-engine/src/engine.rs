//! The main fuzzing loop.
//!
//! Phases: corpus replay -> warm-up -> fuzzing. One fuzz iteration
//! schedules a tree leaf, configures the generator with the leaf's path
//! conditions, and classifies each executed input as duplicate,
//! considerably-longer migration, path conflict, new path, or
//! counter-example; the last three end the iteration after refining the
//! affected conditions.
//!
//! All recoverable trouble (synthesizer give-ups, path conflicts) resolves
//! inside the loop. Unsatisfiable user constraints and unexpected target
//! exceptions are fatal; the latter aborts so a debugger can attach to the
//! core.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, error, info, warn};

use waypoint_act::{CondKind, Condition, ExecTree, NodeId, SynthCtx, SynthesisStatus};
use waypoint_core::{Args, BoolExpr, ExecPath, Input, InputSignature, Pcid, RunStatus, TracePC};
use waypoint_solve::{InputGenerator, SolverOptions};
use waypoint_synth::Synthesizer;

use crate::config::FuzzConfig;
use crate::corpus::{parse_seed_stamp, CorpusStore};
use crate::error::{EngineError, EngineResult};
use crate::options::Options;
use crate::stats::{timed, EngineStats, StatSnapshot, STAT_INTERVAL_S};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    RunningCorpus,
    InitializingTree,
    Warmup,
    FuzzRunning,
}

pub struct Engine<F> {
    callback: F,
    opts: Options,
    sig: InputSignature,
    hard: Vec<BoolExpr>,
    tracer: Arc<Mutex<TracePC>>,
    tree: ExecTree,
    generator: InputGenerator,
    synthesizer: Box<dyn Synthesizer>,
    corpus: CorpusStore,
    rng: StdRng,
    stats: EngineStats,
    started_at: Instant,
    covered_pc: usize,
    total_gen: u64,
    iter: u64,
    next_stat_at: u64,
    phase: Phase,
}

impl<F> Engine<F>
where
    F: FnMut(&Input) -> i32,
{
    pub fn new(
        config: FuzzConfig,
        opts: Options,
        callback: F,
        tracer: Arc<Mutex<TracePC>>,
        synthesizer: Box<dyn Synthesizer>,
        rng: StdRng,
    ) -> EngineResult<Self> {
        let (sig, mut hard, soft) = config.into_parts();
        if sig.num_params() == 0 {
            return Err(EngineError::EmptySignature);
        }
        hard.extend(opts.cmd_constraints(&sig)?);

        let solver_opts = SolverOptions {
            int_min: opts.int_min,
            int_max: opts.int_max,
            mut_rate: opts.mut_rate,
        };
        // Fails here when the hard constraints leave no input at all.
        let generator = InputGenerator::new(&sig, solver_opts, hard.clone(), soft)?;

        let limits = tracer.lock().unwrap().limits();
        let tree = ExecTree::new(sig.clone(), limits, opts.synthesis_budget_ns());
        let passive = opts.run_only || opts.run_cmd_input.is_some();
        let corpus = CorpusStore::prepare(opts.corpus.clone(), passive)?;

        Ok(Self {
            callback,
            sig,
            hard,
            tracer,
            tree,
            generator,
            synthesizer,
            corpus,
            rng,
            stats: EngineStats::default(),
            started_at: Instant::now(),
            covered_pc: 0,
            total_gen: 0,
            iter: 0,
            next_stat_at: STAT_INTERVAL_S,
            phase: Phase::InitializingTree,
            opts,
        })
    }

    pub fn tree(&self) -> &ExecTree {
        &self.tree
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn total_gen(&self) -> u64 {
        self.total_gen
    }

    pub fn num_paths(&self) -> usize {
        self.tree.leaves().len()
    }

    fn elapsed_s(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Checked at every loop head, including inside refinement. Emits the
    /// periodic statistics snapshot as a side effect.
    fn check_budget(&mut self) -> EngineResult<()> {
        let elapsed = self.elapsed_s();
        if let Some(stat_path) = self.opts.output_stat.clone() {
            if elapsed >= self.next_stat_at {
                let snap = self.snapshot(self.next_stat_at);
                self.stats.append_csv(&stat_path, &snap)?;
                self.next_stat_at += STAT_INTERVAL_S;
            }
        }
        if elapsed > self.opts.max_total_time || self.total_gen > self.opts.max_total_gen {
            return Err(EngineError::BudgetExhausted);
        }
        Ok(())
    }

    fn snapshot(&self, at_s: u64) -> StatSnapshot {
        let tracer = self.tracer.lock().unwrap();
        StatSnapshot {
            at_s,
            num_instrumented: tracer.num_instrumented(),
            num_covered: self.covered_pc,
            num_nd: tracer.num_nd(),
            total_gen: self.total_gen,
            num_internals: self.tree.internals().len(),
            num_leaves: self.tree.leaves().len(),
            total_prefix_length: self.tree.total_prefix_length(),
            num_params: self.sig.num_params(),
            num_total_inputs: self.tree.num_total_inputs(),
            elapsed_ms: self.started_at.elapsed().as_millis() as u64,
        }
    }

    /// End-of-run summary for the console.
    pub fn summary(&self) -> String {
        let tracer = self.tracer.lock().unwrap();
        let mut out = format!(
            "Done. Generated {} inputs in {} seconds.\n",
            self.total_gen,
            self.elapsed_s()
        );
        out.push_str(&format!(
            "Number of instrumented PCs: {}\n",
            tracer.num_instrumented()
        ));
        out.push_str(&format!("Number of covered PCs: {}\n", self.covered_pc));
        let num_nd = tracer.num_nd();
        if num_nd != 0 {
            out.push_str(&format!("Number of nondeterministic PCs: {}\n", num_nd));
        }
        out.push_str(&format!("Found paths: {}\n", self.num_paths()));
        if self.phase == Phase::FuzzRunning {
            out.push_str(&format!(
                "Total number of generation: {}\n",
                self.total_gen
            ));
        }
        out
    }

    pub fn render_tree(&self) -> String {
        self.tree.render(self.opts.colorize())
    }

    // ------------------------------------------------------------------
    // Running the target
    // ------------------------------------------------------------------

    /// Invoke the user callback with a clean tracer. The callback itself
    /// turns tracing on around the target section.
    fn run_callback(
        &mut self,
        input: &Input,
        measure_covered_before: bool,
    ) -> EngineResult<(RunStatus, ExecPath)> {
        {
            let mut tracer = self.tracer.lock().unwrap();
            tracer.trace_off();
            tracer.clear_path_log();
            tracer.init_covered_map();
            if measure_covered_before {
                self.covered_pc = tracer.num_covered();
            }
        }

        let code = (self.callback)(input);

        let (mut status, epath) = {
            let mut tracer = self.tracer.lock().unwrap();
            tracer.trace_off();
            (RunStatus::from_code(code), tracer.path_log())
        };
        if status == RunStatus::UnexpectedException {
            if self.opts.ignore_exception {
                status = RunStatus::ExpectedException;
            } else {
                error!("aborting: target raised an unexpected exception");
                std::process::abort();
            }
        }
        Ok((status, epath))
    }

    /// Keep or drop the provisional seed written for the last input.
    fn check_run_result(&mut self, status: RunStatus) -> EngineResult<()> {
        if status == RunStatus::Pass {
            self.corpus.delete_last()?;
            return Ok(());
        }
        if status == RunStatus::Ok {
            self.stats.num_pass += 1;
        } else {
            self.stats.num_fail += 1;
        }

        let covered_new = self.tracer.lock().unwrap().num_covered();
        if covered_new > self.covered_pc {
            self.covered_pc = covered_new;
            self.corpus.commit_last()?;
        } else {
            self.corpus.delete_last()?;
        }
        Ok(())
    }

    fn set_generator(
        &mut self,
        enum_conds: &[Condition],
        numeric_conds: &[Condition],
    ) -> EngineResult<()> {
        self.generator
            .set_condition(enum_conds, numeric_conds, &mut self.rng)?;
        Ok(())
    }

    fn run_generator(&mut self) -> EngineResult<Option<Input>> {
        let input = self.generator.gen(&mut self.rng)?;
        if let Some(input) = &input {
            let elapsed = self.elapsed_s();
            self.corpus
                .write_seed(&self.sig, input, elapsed, self.total_gen)?;
        }
        Ok(input)
    }

    fn schedule(&mut self) -> NodeId {
        let leaves = self.tree.leaves();
        *leaves
            .choose(&mut self.rng)
            .expect("schedule on an empty tree")
    }

    // ------------------------------------------------------------------
    // Refinement
    // ------------------------------------------------------------------

    /// Re-synthesize the conditions of the given nodes, deducting spent
    /// budget and promoting families on give-up. A target exits on
    /// success, on failure (the engine will try again later with more
    /// examples), or by promotion reaching a workable family.
    fn refine(&mut self, targets: &[NodeId]) -> EngineResult<()> {
        for &target in targets {
            debug_assert!(self.tree.parent(target).is_some());

            let (pos, neg) = self.tree.examples(target);
            let sibling = self.tree.sibling(target);
            let is_pair = sibling.is_some();

            loop {
                self.check_budget()?;

                let ctx = SynthCtx {
                    sig: &self.sig,
                    synthesizer: self.synthesizer.as_ref(),
                    budget_max_ns: self.opts.synthesis_budget_ns(),
                    accuracy_threshold: self.opts.cond_accuracy_threshold,
                };
                let outcome =
                    self.tree
                        .cond(target)
                        .synthesize(&ctx, is_pair, &pos, &neg, &mut self.rng)?;

                match outcome.status {
                    SynthesisStatus::Success | SynthesisStatus::Fail => {
                        if outcome.status == SynthesisStatus::Success {
                            self.tree.set_cond(
                                target,
                                outcome.cond.expect("successful synthesis returns a condition"),
                            );
                            if let Some(sibling) = sibling {
                                self.tree.set_cond(
                                    sibling,
                                    outcome
                                        .sibling
                                        .expect("pair synthesis returns a sibling condition"),
                                );
                            }
                        }
                        if let Some(sibling) = sibling {
                            self.tree.cond_mut(target).deduct_budget(outcome.elapsed_ns / 2);
                            self.tree
                                .cond_mut(sibling)
                                .deduct_budget(outcome.elapsed_ns / 2);
                        } else {
                            self.tree.cond_mut(target).deduct_budget(outcome.elapsed_ns);
                        }
                        break;
                    }
                    SynthesisStatus::GiveUp => {
                        self.tree.promote_cond(target);
                    }
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Phases
    // ------------------------------------------------------------------

    /// Run one input supplied on the command line and exit.
    pub fn run_cmd_input(&mut self) -> EngineResult<()> {
        let raw = self
            .opts
            .run_cmd_input
            .clone()
            .expect("run_cmd_input without --run_cmd_input");
        let values: Vec<i64> = raw
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|part| !part.is_empty())
            .map(|part| {
                part.parse()
                    .map_err(|_| EngineError::BadCmdInput(format!("`{}` is not an integer", part)))
            })
            .collect::<EngineResult<_>>()?;
        let input = self.sig.deserialize(&values)?;
        info!(input = %self.sig.render_input(&input), "running command-line input");
        self.run_callback(&input, false)?;
        Ok(())
    }

    fn seed_in_replay_window(&self, stem: &str) -> bool {
        match parse_seed_stamp(stem) {
            Some(stamp) => {
                self.opts.run_corpus_from_time <= stamp.time
                    && stamp.time < self.opts.run_corpus_to_time
                    && self.opts.run_corpus_from_gen <= stamp.gen
                    && stamp.gen < self.opts.run_corpus_to_gen
            }
            // An unstamped file is an initial seed: included exactly when
            // the windows reach below zero.
            None => {
                self.opts.run_corpus_from_time < 0
                    && self.opts.run_corpus_to_time >= 0
                    && self.opts.run_corpus_from_gen < 0
                    && self.opts.run_corpus_to_gen >= 0
            }
        }
    }

    /// Replay the corpus. Without `--run_only`, every replayed path seeds
    /// the tree. Returns the number of inputs run.
    pub fn run_corpus(&mut self) -> EngineResult<usize> {
        self.phase = Phase::RunningCorpus;

        let dir = self.corpus.dir().to_path_buf();
        let seeds: Vec<PathBuf> = if dir.is_file() {
            vec![dir]
        } else {
            self.corpus
                .list_seeds()?
                .into_iter()
                .filter(|path| {
                    path.file_stem()
                        .and_then(|s| s.to_str())
                        .is_some_and(|stem| self.seed_in_replay_window(stem))
                })
                .collect()
        };

        info!(seeds = seeds.len(), "replaying corpus");
        let mut num_run = 0;
        for seed in seeds {
            let raw = CorpusStore::read_seed(&seed)?;
            let input = match self.sig.deserialize(&raw) {
                Ok(input) => input,
                Err(err) => {
                    warn!(seed = %seed.display(), %err, "skipping corpus file");
                    continue;
                }
            };
            if !eval_hard(&self.hard, input.numeric_args()) {
                debug!(seed = %seed.display(), "skipping input that violates hard constraints");
                continue;
            }
            debug!(seed = %seed.display(), input = %self.sig.render_input(&input), "running corpus input");
            let (status, epath) = self.run_callback(&input, false)?;
            if !self.opts.run_only && !epath.is_empty() {
                self.tree.insert(&epath, input, status, &mut self.rng);
            }
            num_run += 1;
        }
        Ok(num_run)
    }

    /// Replay the corpus in time or generation buckets and append one
    /// `interval,covered` line per bucket to the coverage CSV.
    pub fn run_corpus_and_output_cov(&mut self) -> EngineResult<()> {
        use std::io::Write as _;

        self.phase = Phase::RunningCorpus;
        assert!(self.opts.run_only, "coverage replay requires --run_only");
        let cov_path = self
            .opts
            .output_cov
            .clone()
            .expect("coverage replay requires --output_cov");

        let itv_time = self.opts.max_total_time != u64::MAX && self.opts.cov_interval_time != 0;
        let itv_gen = self.opts.max_total_gen != u64::MAX && self.opts.cov_interval_gen != 0;
        assert!(
            itv_time || itv_gen,
            "specify --max_total_time with --cov_interval_time, or --max_total_gen with --cov_interval_gen"
        );
        let total = if itv_time {
            self.opts.max_total_time
        } else {
            self.opts.max_total_gen
        };
        let interval = if itv_time {
            self.opts.cov_interval_time
        } else {
            self.opts.cov_interval_gen
        };

        let num_buckets = total.div_ceil(interval) as usize;
        let mut buckets: Vec<Vec<PathBuf>> = vec![Vec::new(); num_buckets];
        for seed in self.corpus.list_seeds()? {
            let Some(stamp) = seed
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(parse_seed_stamp)
            else {
                continue;
            };
            let at = if itv_time { stamp.time } else { stamp.gen };
            if at < 0 {
                continue;
            }
            let idx = (at as u64 / interval) as usize;
            if idx < num_buckets {
                buckets[idx].push(seed);
            }
        }

        self.tracer.lock().unwrap().init_covered_map();
        let mut file = std::fs::File::create(&cov_path)?;
        writeln!(
            file,
            "Total Coverage,{}\n",
            self.tracer.lock().unwrap().num_instrumented()
        )?;
        writeln!(file, "{},Coverage", if itv_time { "Time" } else { "Gen" })?;

        let mut t = interval;
        for bucket in buckets {
            for seed in bucket {
                let raw = CorpusStore::read_seed(&seed)?;
                let Ok(input) = self.sig.deserialize(&raw) else {
                    continue;
                };
                if !eval_hard(&self.hard, input.numeric_args()) {
                    continue;
                }
                self.run_callback(&input, false)?;
            }
            let covered = self.tracer.lock().unwrap().num_covered();
            writeln!(file, "{},{}", t, covered)?;
            t += interval;
        }
        Ok(())
    }

    /// Run unconstrained inputs to shake initialization effects out of the
    /// target, then re-run the last input until two consecutive paths
    /// agree, discovering nondeterministic PCs along the way.
    pub fn warmup(&mut self) -> EngineResult<()> {
        let warmup_start = Instant::now();
        self.phase = Phase::Warmup;
        let cnt = self.opts.warmup as usize;
        debug!(cnt, "warming up");

        let mut last_input = None;
        let mut epath = ExecPath::new();
        let mut truncated = false;
        for _ in 0..cnt {
            self.set_generator(&[], &[])?;
            loop {
                let input = self
                    .run_generator()?
                    .expect("unconstrained generation cannot run dry");
                let (status, path) = self.run_callback(&input, true)?;
                self.check_run_result(status)?;
                truncated = self.tracer.lock().unwrap().truncated(&path);
                epath = path;
                last_input = Some(input);
                if status != RunStatus::Pass {
                    break;
                }
            }
            self.total_gen += 1;
            if epath.is_empty() {
                return Err(EngineError::EmptyPath);
            }
        }

        if self.opts.wo_nbp {
            self.stats.time_warmup += warmup_start.elapsed();
            return Ok(());
        }

        // Stability loop: the same input must produce the same significant
        // path `cnt` times in a row.
        let input = last_input.expect("warmup ran at least once");
        let mut stable = 0;
        while stable < cnt {
            let (_, epath_rerun) = self.run_callback(&input, false)?;
            let (same, old_longer) = {
                let tracer = self.tracer.lock().unwrap();
                (
                    tracer.eq_significant(&epath, &epath_rerun)
                        || tracer.considerably_longer(&epath_rerun, &epath),
                    tracer.considerably_longer(&epath, &epath_rerun),
                )
            };
            if same {
                stable += 1;
                continue;
            }
            if old_longer {
                // The recorded path only moves when it actually ends in a
                // leaf; warm-up may observe paths the tree never stored.
                let at_leaf = self
                    .tree
                    .find(&epath)
                    .is_some_and(|node| self.tree.is_leaf(node));
                if at_leaf {
                    self.tree
                        .purge_and_reinsert(&epath, &epath_rerun, &mut self.rng);
                }
                stable += 1;
                continue;
            }

            info!(
                len_a = epath.len(),
                len_b = epath_rerun.len(),
                "same input produced different paths; marking nondeterministic PCs"
            );
            self.tracer
                .lock()
                .unwrap()
                .check_diff(&epath, &epath_rerun);
            if !truncated {
                epath = self.tracer.lock().unwrap().prune(&epath);
            } else {
                // The recorded path was cut off; pruning it would leave a
                // stale suffix. Take a fresh run instead.
                let (_, fresh) = self.run_callback(&input, false)?;
                truncated = self.tracer.lock().unwrap().truncated(&fresh);
                epath = fresh;
            }
            stable = 0;
        }
        self.stats.time_warmup += warmup_start.elapsed();
        Ok(())
    }

    /// One engine iteration: schedule, generate, execute, classify,
    /// refine. See the module doc.
    pub fn run_iteration(&mut self) -> EngineResult<()> {
        self.check_budget()?;
        self.iter += 1;
        self.phase = Phase::FuzzRunning;

        let scheduling_start = Instant::now();
        let (enum_conds, numeric_conds) = if self.tree.is_empty() {
            (Vec::new(), Vec::new())
        } else {
            let target = self.schedule();
            self.tree.path_conditions(target)
        };
        self.stats.time_scheduling += scheduling_start.elapsed();

        let setting_start = Instant::now();
        self.set_generator(&enum_conds, &numeric_conds)?;
        self.stats.time_generation_setting += setting_start.elapsed();

        let mut gen_remained = self.opts.max_gen_per_iter;
        let iter_budget = Duration::from_millis(self.opts.max_time_per_iter);
        let before_iter = Instant::now();

        while gen_remained > 0 && before_iter.elapsed() < iter_budget {
            self.check_budget()?;

            // Draw until a recordable run or the iteration budget is gone.
            let (input, status, epath) = loop {
                let gen_start = Instant::now();
                let input = self.run_generator()?;
                self.stats.time_generation += gen_start.elapsed();
                let Some(input) = input else {
                    // Both solvers are out of fresh assignments for this
                    // path; move on to another leaf.
                    return Ok(());
                };

                let run_start = Instant::now();
                let (status, epath) = self.run_callback(&input, true)?;
                self.stats.time_running_callback += run_start.elapsed();
                let check_start = Instant::now();
                self.check_run_result(status)?;
                self.stats.time_result_check += check_start.elapsed();

                if status.is_recordable() {
                    break (input, status, epath);
                }
                if before_iter.elapsed() >= iter_budget {
                    return Ok(());
                }
            };
            gen_remained -= 1;
            self.total_gen += 1;

            if epath.is_empty() {
                return Err(EngineError::EmptyPath);
            }

            if self.tree.has_input(&input) {
                if self.handle_duplicate(&input, status, &epath)? {
                    return Ok(());
                }
                continue;
            }

            let path_check_start = Instant::now();
            let found_new_path = !self.tree.has_path(&epath);
            self.stats.time_path_check += path_check_start.elapsed();
            if found_new_path {
                let insert_start = Instant::now();
                self.tree.insert(&epath, input.clone(), status, &mut self.rng);
                self.stats.time_path_insert += insert_start.elapsed();
            }

            let eval_start = Instant::now();
            let incorrect = self.tree.evaluate_conditions(&input, &epath);
            let found_counter_example = !incorrect.is_empty();
            if !found_new_path && found_counter_example {
                // The path exists but this input contradicts a learned
                // condition: keep it as an example for refinement.
                self.tree.insert(&epath, input.clone(), status, &mut self.rng);
            }
            let mut refinement_target: Vec<NodeId> = Vec::new();
            for node in incorrect {
                if let Some(sibling) = self.tree.sibling(node) {
                    if refinement_target.contains(&sibling) {
                        continue;
                    }
                }
                let accurate = self.tree.cond(node).is_accurate(
                    self.opts.synthesis_budget_ns(),
                    self.opts.cond_accuracy_threshold,
                );
                if !accurate {
                    refinement_target.push(node);
                }
            }
            self.stats.time_condition_evaluation += eval_start.elapsed();

            let synthesis_start = Instant::now();
            self.refine(&refinement_target)?;
            self.stats.time_synthesis += synthesis_start.elapsed();

            if found_new_path || found_counter_example {
                debug!(iter = self.iter, "tree updated\n{}", self.render_tree());
                return Ok(());
            }
        }
        Ok(())
    }

    /// An input the tree already owns came back. Returns `true` when the
    /// iteration should end (a conflict was handled).
    fn handle_duplicate(
        &mut self,
        input: &Input,
        status: RunStatus,
        epath: &[Pcid],
    ) -> EngineResult<bool> {
        let epath_old = self
            .tree
            .path_of_input(input)
            .expect("duplicate input without a recorded path");
        assert!(!epath_old.is_empty());

        let (same, migrate) = {
            let tracer = self.tracer.lock().unwrap();
            let same = tracer.eq_significant(&epath_old, epath);
            let migrate = !same
                && (tracer.considerably_longer(epath, &epath_old)
                    || tracer.considerably_longer(&epath_old, epath));
            (same, migrate)
        };
        if same {
            return Ok(false);
        }
        if migrate {
            // A much longer or much shorter path for a known input is not
            // noise worth ND analysis; the record just moves.
            self.tree
                .purge_and_reinsert(&epath_old, epath, &mut self.rng);
            return Ok(false);
        }

        if self.opts.wo_nbp {
            // ND pruning disabled: stop trusting every condition under the
            // lowest common ancestor of the two paths.
            let leaf_old = self.tree.leaf_of(input).expect("duplicate input has a leaf");
            let leaf_new = match self.tree.find(epath) {
                Some(leaf) => leaf,
                None => self.tree.insert(epath, input.clone(), status, &mut self.rng),
            };
            assert_ne!(leaf_old, leaf_new);
            let lca = self.tree.lowest_common_ancestor(leaf_old, leaf_new);
            assert!(!self.tree.is_leaf(lca));
            for child in self.tree.children(lca).to_vec() {
                self.tree.set_cond(
                    child,
                    Condition::new(CondKind::Neglect, self.opts.synthesis_budget_ns()),
                );
            }
            return Ok(true);
        }

        info!(
            len_old = epath_old.len(),
            len_new = epath.len(),
            "conflicting paths for one input; checking nondeterministic PCs"
        );
        self.stats.num_conflict += 1;

        timed(&mut self.stats.time_duplicate_checkdiff, || {
            self.tracer.lock().unwrap().check_diff(&epath_old, epath)
        });
        {
            let reconstruction_start = Instant::now();
            let tracer = self.tracer.lock().unwrap();
            self.tree.prune(&tracer);
            self.stats.time_duplicate_reconstruction += reconstruction_start.elapsed();
        }
        let synthesis_start = Instant::now();
        let invalid = self.tree.invalid_condition_nodes();
        self.refine(&invalid)?;
        self.stats.time_duplicate_synthesis += synthesis_start.elapsed();

        debug!(iter = self.iter, "tree reconstructed\n{}", self.render_tree());
        Ok(true)
    }

    /// Drive phases to completion: corpus, warm-up, then fuzz until the
    /// budget runs out.
    pub fn run_to_completion(&mut self) -> EngineResult<()> {
        if self.opts.run_cmd_input.is_some() {
            self.run_cmd_input()?;
            println!("{}", self.render_tree());
            return Ok(());
        }
        if self.opts.run_only && self.opts.output_cov.is_some() {
            return self.run_corpus_and_output_cov();
        }

        let num_seeds = self.run_corpus()?;
        if self.opts.run_only {
            println!(
                "Replayed {} corpus inputs in {} seconds.\n{}",
                num_seeds,
                self.elapsed_s(),
                self.summary()
            );
            return Ok(());
        }
        if num_seeds > 0 {
            info!(num_seeds, "initialized tree from corpus");
        }

        self.warmup()?;

        let mut iterations = 0u64;
        while iterations < self.opts.max_iter {
            match self.run_iteration() {
                Ok(()) => {}
                Err(EngineError::BudgetExhausted) => break,
                Err(err) => return Err(err),
            }
            iterations += 1;
        }
        println!("{}", self.summary());
        Ok(())
    }
}

fn eval_hard(constraints: &[BoolExpr], args: &Args) -> bool {
    constraints
        .iter()
        .all(|c| c.eval(args).unwrap_or(false))
}

/// Library entry point: parse CLI options from the environment and run.
pub fn driver<F>(config: FuzzConfig, callback: F) -> anyhow::Result<i32>
where
    F: FnMut(&Input) -> i32,
{
    use clap::Parser as _;
    driver_with_options(config, callback, Options::parse())
}

/// Entry point with explicit options (tests and embedders).
pub fn driver_with_options<F>(
    config: FuzzConfig,
    callback: F,
    opts: Options,
) -> anyhow::Result<i32>
where
    F: FnMut(&Input) -> i32,
{
    init_logging(opts.verbose);

    let synthesizer = resolve_synthesizer(&opts)?;
    let tracer = waypoint_core::global_tracer();
    let rng = StdRng::from_entropy();

    let mut engine = Engine::new(config, opts, callback, tracer, synthesizer, rng)?;
    engine.run_to_completion()?;
    Ok(0)
}

fn resolve_synthesizer(opts: &Options) -> anyhow::Result<Box<dyn Synthesizer>> {
    let binary = opts
        .duet_bin
        .clone()
        .or_else(|| std::env::var_os("WAYPOINT_DUET").map(PathBuf::from));
    match binary {
        Some(binary) => {
            let synthesizer = waypoint_synth::DuetSynthesizer::new(binary);
            if !opts.run_only {
                synthesizer.probe()?;
            }
            Ok(Box::new(synthesizer))
        }
        None if opts.run_only || opts.run_cmd_input.is_some() => {
            // Replay and single-input runs never synthesize; a dead
            // backend is fine.
            Ok(Box::new(waypoint_synth::FnSynthesizer(|_: &str| {
                String::new()
            })))
        }
        None => anyhow::bail!("no synthesizer configured; pass --duet_bin or set WAYPOINT_DUET"),
    }
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}
