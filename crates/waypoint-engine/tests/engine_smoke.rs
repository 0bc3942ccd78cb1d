//! End-to-end engine test against a deterministic in-process target, a
//! mock tracer, and a fake synthesizer. No subprocess, no coverage
//! instrumentation; the callback feeds the tracer by hand, exactly as the
//! `traced` wrapper would.

use std::sync::{Arc, Mutex};

use clap::Parser as _;
use rand::rngs::StdRng;
use rand::SeedableRng;

use waypoint_core::trace::PathLimits;
use waypoint_core::{Input, TracePC};
use waypoint_engine::{Engine, EngineError, FuzzConfig, Options};
use waypoint_synth::FnSynthesizer;

fn mock_tracer() -> Arc<Mutex<TracePC>> {
    let mut tpc = TracePC::new(PathLimits::new(1000));
    let mut guards = [0u32; 100];
    tpc.handle_init(&mut guards);
    Arc::new(Mutex::new(tpc))
}

fn options(corpus: &std::path::Path, max_gen: u64) -> Options {
    Options::parse_from([
        "waypoint",
        "--corpus",
        corpus.to_str().unwrap(),
        "--max_total_gen",
        &max_gen.to_string(),
        "--warmup",
        "4",
        "--mut_rate",
        "0.0",
    ])
}

/// Target with one branch on `a <= 0`; the fake synthesizer knows the
/// separating predicate.
fn branching_engine(
    corpus: &std::path::Path,
    max_gen: u64,
) -> Engine<impl FnMut(&Input) -> i32> {
    let tracer = mock_tracer();
    let mut config = FuzzConfig::new();
    config.int_arg("a").unwrap();

    let callback = {
        let tracer = tracer.clone();
        move |input: &Input| {
            let a = input.get("a").unwrap();
            let mut tpc = tracer.lock().unwrap();
            tpc.trace_on();
            tpc.clear_path_log();
            tpc.append(1);
            if a <= 0 {
                tpc.append(2);
            } else {
                tpc.append(3);
            }
            tpc.trace_off();
            0
        }
    };

    // Answers like the real backend would: a predicate that is true on
    // the positive examples. The branch splits at a <= 0, so inspecting
    // one positive example is enough.
    let synthesizer = FnSynthesizer(|sygus: &str| {
        let positive = sygus.lines().find_map(|line| {
            let rest = line.strip_prefix("(constraint (= (f ")?;
            let (value, verdict) = rest.split_once(')')?;
            if verdict.contains("true") {
                value.trim().parse::<i64>().ok()
            } else {
                None
            }
        });
        match positive {
            Some(v) if v <= 0 => "(define-fun f ((a Int)) Bool (<= a 0))".to_string(),
            Some(_) => "(define-fun f ((a Int)) Bool (> a 0))".to_string(),
            None => String::new(),
        }
    });

    Engine::new(
        config,
        options(corpus, max_gen),
        callback,
        tracer,
        Box::new(synthesizer),
        StdRng::seed_from_u64(23),
    )
    .unwrap()
}

#[test]
fn discovers_both_branches_and_learns_conditions() {
    let corpus = tempfile::tempdir().unwrap();
    let mut engine = branching_engine(corpus.path(), 200);

    engine.warmup().unwrap();
    loop {
        match engine.run_iteration() {
            Ok(()) => {}
            Err(EngineError::BudgetExhausted) => break,
            Err(err) => panic!("engine failed: {}", err),
        }
    }

    let tree = engine.tree();
    assert!(tree.invariants_hold());
    // Two execution paths, one per branch.
    assert_eq!(engine.num_paths(), 2);
    assert!(tree.has_path(&[1, 2]));
    assert!(tree.has_path(&[1, 3]));

    // Sibling conditions were learned and are valid.
    let leaf = tree.find(&[1, 2]).unwrap();
    assert!(!tree.cond(leaf).invalid());
    let sibling = tree.sibling(leaf).unwrap();
    assert!(!tree.cond(sibling).invalid());
}

#[test]
fn committed_seeds_survive_in_the_corpus() {
    let corpus = tempfile::tempdir().unwrap();
    let mut engine = branching_engine(corpus.path(), 60);

    engine.warmup().unwrap();
    loop {
        match engine.run_iteration() {
            Ok(()) => {}
            Err(EngineError::BudgetExhausted) => break,
            Err(err) => panic!("engine failed: {}", err),
        }
    }

    // Coverage-increasing seeds were committed (no CRASH_ prefix); every
    // other provisional seed was deleted.
    let names: Vec<String> = std::fs::read_dir(corpus.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert!(!names.is_empty());
    assert!(names.iter().any(|n| n.starts_with("time")));
}

#[test]
fn corpus_replay_seeds_the_tree() {
    let corpus = tempfile::tempdir().unwrap();

    // First run discovers paths and writes seeds.
    {
        let mut engine = branching_engine(corpus.path(), 60);
        engine.warmup().unwrap();
        loop {
            match engine.run_iteration() {
                Ok(()) => {}
                Err(EngineError::BudgetExhausted) => break,
                Err(err) => panic!("engine failed: {}", err),
            }
        }
    }

    // Second run replays the corpus before fuzzing; the tree is populated
    // without any generation.
    let mut engine = branching_engine(corpus.path(), 60);
    let replayed = engine.run_corpus().unwrap();
    assert!(replayed > 0);
    assert!(!engine.tree().is_empty());
    assert!(engine.tree().invariants_hold());
}

#[test]
fn nondeterministic_target_is_stabilized_by_warmup() {
    let tracer = mock_tracer();
    let mut config = FuzzConfig::new();
    config.int_arg("a").unwrap();

    // PCID 7 appears on every other run: classic init-phase noise.
    let flip = Arc::new(Mutex::new(false));
    let callback = {
        let tracer = tracer.clone();
        let flip = flip.clone();
        move |_input: &Input| {
            let mut flip = flip.lock().unwrap();
            *flip = !*flip;
            let noisy = *flip;
            drop(flip);

            let mut tpc = tracer.lock().unwrap();
            tpc.trace_on();
            tpc.clear_path_log();
            tpc.append(1);
            if noisy {
                tpc.append(7);
            }
            tpc.append(2);
            tpc.trace_off();
            0
        }
    };

    let corpus = tempfile::tempdir().unwrap();
    let mut engine = Engine::new(
        config,
        options(corpus.path(), 500),
        callback,
        tracer.clone(),
        Box::new(FnSynthesizer(|_: &str| String::new())),
        StdRng::seed_from_u64(29),
    )
    .unwrap();

    engine.warmup().unwrap();
    // Warm-up re-ran the last input and caught the disagreeing paths. The
    // mid-path insertion costs the trailing pcid 2 as well (the one-edit
    // tie-break shadows the longer side's last position).
    assert!(tracer.lock().unwrap().is_nd(7));

    loop {
        match engine.run_iteration() {
            Ok(()) => {}
            Err(EngineError::BudgetExhausted) => break,
            Err(err) => panic!("engine failed: {}", err),
        }
    }
    // With the noise filtered there is exactly one real path.
    assert_eq!(engine.num_paths(), 1);
    let stable: Vec<u32> = {
        let tracer = tracer.lock().unwrap();
        tracer.prune(&[1, 7, 2])
    };
    assert!(engine.tree().has_path(&stable));
}
