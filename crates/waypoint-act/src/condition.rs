//! Branch conditions: predicates over input parameters attached to tree
//! edges, each with a confusion matrix and a synthesis time budget.
//!
//! A condition is learned *against its siblings*: positive examples are the
//! inputs reaching the node, negative examples the inputs reaching any
//! sibling. Conditions that cannot be learned in their current family are
//! promoted along the ladder Enum -> Numeric -> Neglect; the ladder never
//! goes back.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use rand::seq::IteratorRandom;
use rand::Rng;
use tracing::debug;

use waypoint_core::signature::CondKind;
use waypoint_core::{BoolExpr, EnumBitVec, Input, InputSignature};
use waypoint_synth::runner::SYNTHESIZER_FAIL_PREFIX;
use waypoint_synth::{
    enum_equality_rules, grammar, numeric_linear_rules, parse_define_fun, sygus_file, SynthResult,
    Synthesizer,
};

/// Cap on examples fed to numeric synthesis; more slows the backend down
/// without sharpening the learned predicate.
pub const MAX_SAMPLE_SIZE: usize = 50;

/// Classification counters for one condition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfusionMatrix {
    true_pos: i64,
    true_neg: i64,
    false_pos: i64,
    false_neg: i64,
}

impl ConfusionMatrix {
    pub fn new(true_pos: i64, true_neg: i64, false_pos: i64, false_neg: i64) -> Self {
        Self {
            true_pos,
            true_neg,
            false_pos,
            false_neg,
        }
    }

    /// The same matrix seen from the sibling's perspective.
    pub fn symmetry(&self) -> Self {
        Self {
            true_pos: self.true_neg,
            true_neg: self.true_pos,
            false_pos: self.false_neg,
            false_neg: self.false_pos,
        }
    }

    pub fn add_true_pos(&mut self) {
        self.true_pos += 1;
    }

    pub fn add_true_neg(&mut self) {
        self.true_neg += 1;
    }

    pub fn add_false_pos(&mut self) {
        self.false_pos += 1;
    }

    pub fn add_false_neg(&mut self) {
        self.false_neg += 1;
    }

    /// Some evidence and not a single misclassification.
    pub fn perfect(&self) -> bool {
        self.true_pos + self.true_neg > 0 && self.false_pos + self.false_neg == 0
    }

    pub fn merge(&mut self, other: &ConfusionMatrix) {
        self.true_pos += other.true_pos;
        self.true_neg += other.true_neg;
        self.false_pos += other.false_pos;
        self.false_neg += other.false_neg;
    }

    /// Matthews correlation coefficient in [-1, 1]. Counters are halved
    /// together above 25k so the product below cannot overflow.
    pub fn accuracy(&self) -> f64 {
        let (mut tp, mut tn, mut fp, mut fn_) =
            (self.true_pos, self.true_neg, self.false_pos, self.false_neg);
        while tp.max(tn).max(fp).max(fn_) > 25_000 {
            tp /= 2;
            tn /= 2;
            fp /= 2;
            fn_ /= 2;
        }
        let numerator = tp * tn - fp * fn_;
        let prod = (tp + fp) * (tp + fn_) * (tn + fp) * (tn + fn_);
        if prod == 0 {
            return 0.0;
        }
        numerator as f64 / (prod as f64).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesisStatus {
    /// A new predicate was found and installed conditions are returned.
    Success,
    /// The backend failed on this problem; the caller may retry after
    /// deducting the spent budget.
    Fail,
    /// The current condition family cannot express the split; promote.
    GiveUp,
}

/// Result of one synthesis attempt.
#[derive(Debug)]
pub struct SynthesisOutcome {
    pub status: SynthesisStatus,
    pub cond: Option<Condition>,
    pub sibling: Option<Condition>,
    pub elapsed_ns: i64,
}

impl SynthesisOutcome {
    fn give_up(elapsed_ns: i64) -> Self {
        Self {
            status: SynthesisStatus::GiveUp,
            cond: None,
            sibling: None,
            elapsed_ns,
        }
    }

    fn fail(elapsed_ns: i64) -> Self {
        Self {
            status: SynthesisStatus::Fail,
            cond: None,
            sibling: None,
            elapsed_ns,
        }
    }
}

/// Per-run constants and collaborators needed by synthesis.
pub struct SynthCtx<'a> {
    pub sig: &'a InputSignature,
    pub synthesizer: &'a dyn Synthesizer,
    /// Full budget each condition starts with, in nanoseconds.
    pub budget_max_ns: i64,
    /// Floor of the dynamic accuracy threshold for numeric conditions.
    pub accuracy_threshold: f64,
}

/// The predicate itself, by condition family.
///
/// An enum condition moves through two phases: value-inclusion (a bitvec of
/// allowed values for one parameter) and, when no single parameter
/// separates the examples, a synthesized equality over parameters of one
/// group. `inclusion: Some(..)` means the inclusion phase is still live.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Enum {
        inclusion: Option<EnumBitVec>,
        equality: Option<BoolExpr>,
    },
    Numeric(Option<BoolExpr>),
    Neglect,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    predicate: Predicate,
    cmat: ConfusionMatrix,
    budget_ns: i64,
}

impl Condition {
    pub fn new(kind: CondKind, budget_ns: i64) -> Self {
        let predicate = match kind {
            CondKind::Enum => Predicate::Enum {
                inclusion: Some(EnumBitVec::new("\u{3b5}", 0, 1)),
                equality: None,
            },
            CondKind::Numeric => Predicate::Numeric(None),
            CondKind::Neglect => Predicate::Neglect,
        };
        // A fresh enum condition is in the inclusion phase with an empty
        // (invalid) set; the placeholder bitvec is replaced on first
        // synthesis.
        Self {
            predicate,
            cmat: ConfusionMatrix::default(),
            budget_ns,
        }
    }

    /// Condition with a known predicate. Used when a learned predicate is
    /// installed wholesale (and by solver tests).
    pub fn from_predicate(predicate: Predicate, budget_ns: i64) -> Self {
        Self {
            predicate,
            cmat: ConfusionMatrix::default(),
            budget_ns,
        }
    }

    pub fn kind(&self) -> CondKind {
        match &self.predicate {
            Predicate::Enum { .. } => CondKind::Enum,
            Predicate::Numeric(_) => CondKind::Numeric,
            Predicate::Neglect => CondKind::Neglect,
        }
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    pub fn cmat(&self) -> &ConfusionMatrix {
        &self.cmat
    }

    /// No usable predicate yet.
    pub fn invalid(&self) -> bool {
        match &self.predicate {
            Predicate::Enum {
                inclusion,
                equality,
            } => match inclusion {
                Some(bv) => bv.is_empty(),
                None => equality.is_none(),
            },
            Predicate::Numeric(cond) => cond.is_none(),
            Predicate::Neglect => false,
        }
    }

    /// Whether the predicate holds for the input. Evaluation failures
    /// (division by zero in a learned numeric predicate) are reported as
    /// `None` and the caller scores them as a misprediction.
    fn predicate_holds(&self, input: &Input) -> Option<bool> {
        match &self.predicate {
            Predicate::Enum {
                inclusion,
                equality,
            } => match inclusion {
                Some(bv) => Some(bv.eval(input.enum_args())),
                None => equality.as_ref()?.eval(input.enum_args()).ok(),
            },
            Predicate::Numeric(cond) => cond.as_ref()?.eval(input.numeric_args()).ok(),
            Predicate::Neglect => Some(true),
        }
    }

    /// Score one example against the predicate and update the matrix.
    /// Returns whether the prediction matched the ground truth.
    pub fn check_and_update(&mut self, input: &Input, ground_truth: bool) -> bool {
        assert!(!self.invalid());
        if self.kind() == CondKind::Neglect {
            // Neglect predicts every example positive and is exempt from
            // bookkeeping; it can never be wrong by definition.
            return true;
        }
        let correct = self.predicate_holds(input) == Some(ground_truth);
        match (correct, ground_truth) {
            (true, true) => self.cmat.add_true_pos(),
            (true, false) => self.cmat.add_true_neg(),
            (false, true) => self.cmat.add_false_neg(),
            (false, false) => self.cmat.add_false_pos(),
        }
        correct
    }

    /// Rebuild the matrix from scratch against full example sets.
    pub fn classify(&mut self, pos: &BTreeSet<Input>, neg: &BTreeSet<Input>) {
        assert!(!self.invalid());
        let mut cmat = ConfusionMatrix::default();
        for example in pos {
            if self.predicate_holds(example) == Some(true) {
                cmat.add_true_pos();
            } else {
                cmat.add_false_neg();
            }
        }
        for example in neg {
            if self.predicate_holds(example) == Some(false) {
                cmat.add_true_neg();
            } else {
                cmat.add_false_pos();
            }
        }
        self.cmat = cmat;
    }

    /// Enum conditions must be perfect; numeric conditions pass a dynamic
    /// Matthews-correlation bar that relaxes as their budget drains.
    pub fn is_accurate(&self, budget_max_ns: i64, threshold_min: f64) -> bool {
        match &self.predicate {
            Predicate::Enum { .. } => self.cmat.perfect(),
            Predicate::Numeric(_) => {
                self.cmat.accuracy() >= self.dynamic_threshold(budget_max_ns, threshold_min)
            }
            Predicate::Neglect => true,
        }
    }

    /// `threshold_min + (1 - threshold_min) * budget_remaining/budget_max`:
    /// fresh conditions must be near-perfect, worn-out ones only beat the
    /// floor.
    fn dynamic_threshold(&self, budget_max_ns: i64, threshold_min: f64) -> f64 {
        let residual = self.budget_ns as f64 / budget_max_ns as f64;
        threshold_min + (1.0 - threshold_min) * residual
    }

    pub fn budget_ns(&self) -> i64 {
        self.budget_ns
    }

    pub fn set_budget_ns(&mut self, budget_ns: i64) {
        self.budget_ns = budget_ns;
    }

    pub fn deduct_budget(&mut self, used_ns: i64) {
        self.budget_ns = (self.budget_ns - used_ns).max(0);
        // Sub-millisecond remainders cannot buy a synthesizer call.
        if self.budget_ns < 1_000_000 {
            self.budget_ns = 0;
        }
    }

    pub fn insolvent(&self) -> bool {
        self.budget_ns <= 0
    }

    /// The next family on the ladder, carrying the current budget.
    pub fn promote(&self) -> Condition {
        let kind = match self.kind() {
            CondKind::Enum => CondKind::Numeric,
            CondKind::Numeric | CondKind::Neglect => CondKind::Neglect,
        };
        Condition::new(kind, self.budget_ns)
    }

    /// Try to learn a predicate separating `pos` from `neg`. With
    /// `is_pair`, the sibling's inverted condition is produced in the same
    /// attempt. On success the returned conditions already carry matrices
    /// classified against the example sets.
    pub fn synthesize<R: Rng + ?Sized>(
        &self,
        ctx: &SynthCtx<'_>,
        is_pair: bool,
        pos: &BTreeSet<Input>,
        neg: &BTreeSet<Input>,
        rng: &mut R,
    ) -> SynthResult<SynthesisOutcome> {
        // Neglect costs nothing to "synthesize", so it is exempt from the
        // insolvency gate; promotion keeps the drained budget and must
        // still be able to land on a working condition.
        if self.kind() != CondKind::Neglect && self.insolvent() {
            return Ok(SynthesisOutcome::give_up(0));
        }

        let mut outcome = match &self.predicate {
            Predicate::Enum { inclusion, .. } => {
                self.synthesize_enum(ctx, inclusion.is_some(), is_pair, pos, neg)?
            }
            Predicate::Numeric(_) => self.synthesize_numeric(ctx, is_pair, pos, neg, rng)?,
            Predicate::Neglect => SynthesisOutcome {
                status: SynthesisStatus::Success,
                cond: Some(self.fresh(Predicate::Neglect)),
                sibling: is_pair.then(|| self.fresh(Predicate::Neglect)),
                elapsed_ns: 0,
            },
        };

        if outcome.status == SynthesisStatus::Success {
            if let Some(cond) = &mut outcome.cond {
                if !cond.invalid() {
                    cond.classify(pos, neg);
                }
            }
            if let Some(sibling) = &mut outcome.sibling {
                if !sibling.invalid() {
                    sibling.classify(neg, pos);
                }
            }
        }
        Ok(outcome)
    }

    /// New condition of the same budget with the given predicate.
    fn fresh(&self, predicate: Predicate) -> Condition {
        Condition {
            predicate,
            cmat: ConfusionMatrix::default(),
            budget_ns: self.budget_ns,
        }
    }

    fn synthesize_enum(
        &self,
        ctx: &SynthCtx<'_>,
        inclusion_phase: bool,
        is_pair: bool,
        pos: &BTreeSet<Input>,
        neg: &BTreeSet<Input>,
    ) -> SynthResult<SynthesisOutcome> {
        let started = Instant::now();

        if inclusion_phase {
            let mut pos_bvs = ctx.sig.empty_bitvecs();
            for example in pos {
                pos_bvs.record(example.enum_args());
            }
            let mut neg_bvs = ctx.sig.empty_bitvecs();
            for example in neg {
                neg_bvs.record(example.enum_args());
            }

            let distinct = pos_bvs.distinct(&neg_bvs);
            if !distinct.is_empty() {
                let cond = self.fresh(Predicate::Enum {
                    inclusion: Some(distinct.export_non_empty()),
                    equality: None,
                });
                let sibling = is_pair.then(|| {
                    let opposite = neg_bvs.distinct(&pos_bvs);
                    self.fresh(Predicate::Enum {
                        inclusion: Some(opposite.export_non_empty()),
                        equality: None,
                    })
                });
                return Ok(SynthesisOutcome {
                    status: SynthesisStatus::Success,
                    cond: Some(cond),
                    sibling,
                    elapsed_ns: elapsed_ns(started),
                });
            }
            // No single parameter separates the sides; fall through to the
            // equality phase.
        }

        // Constraint values are positional: enum params in declaration
        // order, matching the synth-fun parameter list.
        let values = |input: &Input| -> Vec<i64> {
            ctx.sig
                .enum_params()
                .iter()
                .map(|p| input.enum_args()[p.name()])
                .collect()
        };
        let mut constraints =
            grammar::io_constraints(&pos.iter().map(values).collect::<Vec<_>>(), true);
        constraints.extend(grammar::io_constraints(
            &neg.iter().map(values).collect::<Vec<_>>(),
            false,
        ));

        let file = sygus_file(
            enum_equality_rules(ctx.sig),
            ctx.sig.enum_param_names(),
            constraints,
        );
        let response = ctx
            .synthesizer
            .run(&file.to_string(), Duration::from_nanos(self.budget_ns as u64))?;

        if response.is_empty() || response.starts_with(SYNTHESIZER_FAIL_PREFIX) {
            debug!("enum equality synthesis gave up");
            return Ok(SynthesisOutcome::give_up(elapsed_ns(started)));
        }

        let body = waypoint_core::expr::simplify(parse_define_fun(&response)?.body);
        let sibling = is_pair.then(|| {
            self.fresh(Predicate::Enum {
                inclusion: None,
                equality: Some(!body.clone()),
            })
        });
        Ok(SynthesisOutcome {
            status: SynthesisStatus::Success,
            cond: Some(self.fresh(Predicate::Enum {
                inclusion: None,
                equality: Some(body),
            })),
            sibling,
            elapsed_ns: elapsed_ns(started),
        })
    }

    fn synthesize_numeric<R: Rng + ?Sized>(
        &self,
        ctx: &SynthCtx<'_>,
        is_pair: bool,
        pos: &BTreeSet<Input>,
        neg: &BTreeSet<Input>,
        rng: &mut R,
    ) -> SynthResult<SynthesisOutcome> {
        let started = Instant::now();

        let sample_size = pos.len().max(neg.len()).min(MAX_SAMPLE_SIZE);
        let values = |input: &&Input| -> Vec<i64> {
            ctx.sig
                .numeric_params()
                .iter()
                .map(|p| input.numeric_args()[p.name()])
                .collect()
        };
        let pos_sampled: Vec<Vec<i64>> = pos
            .iter()
            .choose_multiple(rng, sample_size)
            .iter()
            .map(values)
            .collect();
        let neg_sampled: Vec<Vec<i64>> = neg
            .iter()
            .choose_multiple(rng, sample_size)
            .iter()
            .map(values)
            .collect();

        let mut constraints = grammar::io_constraints(&pos_sampled, true);
        constraints.extend(grammar::io_constraints(&neg_sampled, false));

        let file = sygus_file(
            numeric_linear_rules(ctx.sig),
            ctx.sig.numeric_param_names(),
            constraints,
        );
        let response = ctx
            .synthesizer
            .run(&file.to_string(), Duration::from_nanos(self.budget_ns as u64))?;

        if response.is_empty() || response.starts_with(SYNTHESIZER_FAIL_PREFIX) {
            debug!("numeric synthesis failed");
            return Ok(SynthesisOutcome::fail(elapsed_ns(started)));
        }

        let body = waypoint_core::expr::simplify(parse_define_fun(&response)?.body);
        let sibling = is_pair.then(|| self.fresh(Predicate::Numeric(Some(!body.clone()))));
        Ok(SynthesisOutcome {
            status: SynthesisStatus::Success,
            cond: Some(self.fresh(Predicate::Numeric(Some(body)))),
            sibling,
            elapsed_ns: elapsed_ns(started),
        })
    }

    /// Human-readable predicate for tree dumps.
    pub fn render(&self) -> String {
        match &self.predicate {
            Predicate::Enum {
                inclusion,
                equality,
            } => match (inclusion, equality) {
                (Some(bv), _) if !bv.is_empty() => bv.render(false),
                (None, Some(eq)) => eq.pretty(),
                _ => "none".to_string(),
            },
            Predicate::Numeric(Some(cond)) => format!(
                "{} / accuracy: {:.3} / budget: {:.2}s",
                cond.pretty(),
                self.cmat.accuracy(),
                self.budget_ns as f64 / 1e9
            ),
            Predicate::Numeric(None) => "none".to_string(),
            Predicate::Neglect => "NEGLECT".to_string(),
        }
    }
}

fn elapsed_ns(started: Instant) -> i64 {
    started.elapsed().as_nanos() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use waypoint_core::Args;
    use waypoint_synth::FnSynthesizer;

    const BUDGET: i64 = 4_000_000_000;

    fn sig() -> InputSignature {
        let mut sig = InputSignature::new();
        sig.add_enum_range("x", 0, 4).unwrap();
        sig.add_enum_range("y", 0, 4).unwrap();
        sig.add_numeric("a").unwrap();
        sig.add_numeric("b").unwrap();
        sig
    }

    fn input(x: i64, y: i64, a: i64, b: i64) -> Input {
        let enum_args: Args = [("x".to_string(), x), ("y".to_string(), y)].into();
        let numeric_args: Args = [("a".to_string(), a), ("b".to_string(), b)].into();
        Input::new(enum_args, numeric_args)
    }

    fn examples(inputs: &[Input]) -> BTreeSet<Input> {
        inputs.iter().cloned().collect()
    }

    #[test]
    fn confusion_matrix_mcc() {
        let perfect = ConfusionMatrix::new(10, 10, 0, 0);
        assert!((perfect.accuracy() - 1.0).abs() < 1e-9);
        assert!(perfect.perfect());

        let inverted = ConfusionMatrix::new(0, 0, 10, 10);
        assert!((inverted.accuracy() + 1.0).abs() < 1e-9);

        let uninformative = ConfusionMatrix::new(5, 5, 5, 5);
        assert!(uninformative.accuracy().abs() < 1e-9);
    }

    #[test]
    fn mcc_rescales_large_counters_without_overflow() {
        let large = ConfusionMatrix::new(40_000_000, 40_000_000, 10, 10);
        let acc = large.accuracy();
        assert!(acc > 0.99 && acc <= 1.0);
    }

    #[test]
    fn symmetry_swaps_perspectives() {
        let m = ConfusionMatrix::new(1, 2, 3, 4);
        assert_eq!(m.symmetry(), ConfusionMatrix::new(2, 1, 4, 3));
    }

    #[test]
    fn fresh_conditions_are_invalid_until_learned() {
        assert!(Condition::new(CondKind::Enum, BUDGET).invalid());
        assert!(Condition::new(CondKind::Numeric, BUDGET).invalid());
        assert!(!Condition::new(CondKind::Neglect, BUDGET).invalid());
    }

    #[test]
    fn promotion_ladder_keeps_budget() {
        let mut cond = Condition::new(CondKind::Enum, BUDGET);
        cond.deduct_budget(BUDGET / 2);
        let numeric = cond.promote();
        assert_eq!(numeric.kind(), CondKind::Numeric);
        assert_eq!(numeric.budget_ns(), BUDGET / 2);
        let neglect = numeric.promote();
        assert_eq!(neglect.kind(), CondKind::Neglect);
        assert_eq!(neglect.promote().kind(), CondKind::Neglect);
    }

    #[test]
    fn insolvent_condition_refuses_synthesis() {
        let mut cond = Condition::new(CondKind::Enum, BUDGET);
        cond.deduct_budget(BUDGET);
        assert!(cond.insolvent());

        let synth = FnSynthesizer(|_: &str| -> String { panic!("must not be called") });
        let ctx = SynthCtx {
            sig: &sig(),
            synthesizer: &synth,
            budget_max_ns: BUDGET,
            accuracy_threshold: 0.6,
        };
        let mut rng = StdRng::seed_from_u64(1);
        let outcome = cond
            .synthesize(&ctx, false, &BTreeSet::new(), &BTreeSet::new(), &mut rng)
            .unwrap();
        assert_eq!(outcome.status, SynthesisStatus::GiveUp);
    }

    #[test]
    fn sub_millisecond_budget_clamps_to_zero() {
        let mut cond = Condition::new(CondKind::Numeric, BUDGET);
        cond.deduct_budget(BUDGET - 500_000);
        assert!(cond.insolvent());
    }

    #[test]
    fn enum_inclusion_phase_separates_disjoint_values() {
        let sig = sig();
        let synth =
            FnSynthesizer(|_: &str| -> String { panic!("inclusion phase needs no synthesizer") });
        let ctx = SynthCtx {
            sig: &sig,
            synthesizer: &synth,
            budget_max_ns: BUDGET,
            accuracy_threshold: 0.6,
        };
        let cond = Condition::new(CondKind::Enum, BUDGET);
        let pos = examples(&[input(0, 0, 0, 0), input(1, 1, 0, 0)]);
        let neg = examples(&[input(2, 1, 0, 0), input(3, 0, 0, 0)]);
        let mut rng = StdRng::seed_from_u64(2);

        let outcome = cond.synthesize(&ctx, true, &pos, &neg, &mut rng).unwrap();
        assert_eq!(outcome.status, SynthesisStatus::Success);

        let mut learned = outcome.cond.unwrap();
        let mut sibling = outcome.sibling.unwrap();
        // `x` separates: pos saw {0,1}, neg saw {2,3}.
        for example in &pos {
            assert!(learned.check_and_update(example, true));
            assert!(sibling.check_and_update(example, false));
        }
        for example in &neg {
            assert!(learned.check_and_update(example, false));
            assert!(sibling.check_and_update(example, true));
        }
        assert!(learned.cmat().perfect());
        assert!(sibling.cmat().perfect());
    }

    #[test]
    fn enum_equality_phase_uses_the_synthesizer() {
        let sig = sig();
        let synth =
            FnSynthesizer(|_: &str| "(define-fun f ((x Int) (y Int)) Bool (= x y))".to_string());
        let ctx = SynthCtx {
            sig: &sig,
            synthesizer: &synth,
            budget_max_ns: BUDGET,
            accuracy_threshold: 0.6,
        };
        let cond = Condition::new(CondKind::Enum, BUDGET);
        // No single parameter separates: pos has x==y, neg has x!=y, with
        // overlapping per-parameter value sets.
        let pos = examples(&[input(0, 0, 0, 0), input(1, 1, 0, 0)]);
        let neg = examples(&[input(0, 1, 0, 0), input(1, 0, 0, 0)]);
        let mut rng = StdRng::seed_from_u64(3);

        let outcome = cond.synthesize(&ctx, true, &pos, &neg, &mut rng).unwrap();
        assert_eq!(outcome.status, SynthesisStatus::Success);
        let learned = outcome.cond.unwrap();
        assert!(learned.cmat().perfect());
        match learned.predicate() {
            Predicate::Enum {
                inclusion: None,
                equality: Some(_),
            } => {}
            other => panic!("expected equality predicate, got {:?}", other),
        }
        // Sibling carries the negation.
        let sibling = outcome.sibling.unwrap();
        assert!(sibling.cmat().perfect());
    }

    #[test]
    fn enum_synthesis_gives_up_on_empty_response() {
        let sig = sig();
        let synth = FnSynthesizer(|_: &str| String::new());
        let ctx = SynthCtx {
            sig: &sig,
            synthesizer: &synth,
            budget_max_ns: BUDGET,
            accuracy_threshold: 0.6,
        };
        let cond = Condition::new(CondKind::Enum, BUDGET);
        let pos = examples(&[input(0, 0, 0, 0)]);
        let neg = examples(&[input(0, 0, 1, 0)]); // same enum args: no split
        let mut rng = StdRng::seed_from_u64(4);
        let outcome = cond.synthesize(&ctx, true, &pos, &neg, &mut rng).unwrap();
        assert_eq!(outcome.status, SynthesisStatus::GiveUp);
    }

    #[test]
    fn numeric_synthesis_failure_is_fail_not_giveup() {
        let sig = sig();
        let synth = FnSynthesizer(|_: &str| format!("{}: oom", SYNTHESIZER_FAIL_PREFIX));
        let ctx = SynthCtx {
            sig: &sig,
            synthesizer: &synth,
            budget_max_ns: BUDGET,
            accuracy_threshold: 0.6,
        };
        let cond = Condition::new(CondKind::Numeric, BUDGET);
        let pos = examples(&[input(0, 0, 1, 1)]);
        let neg = examples(&[input(0, 0, -1, -1)]);
        let mut rng = StdRng::seed_from_u64(5);
        let outcome = cond.synthesize(&ctx, false, &pos, &neg, &mut rng).unwrap();
        assert_eq!(outcome.status, SynthesisStatus::Fail);
    }

    #[test]
    fn numeric_success_installs_negated_sibling() {
        let sig = sig();
        let synth =
            FnSynthesizer(|_: &str| "(define-fun f ((a Int) (b Int)) Bool (<= a b))".to_string());
        let ctx = SynthCtx {
            sig: &sig,
            synthesizer: &synth,
            budget_max_ns: BUDGET,
            accuracy_threshold: 0.6,
        };
        let cond = Condition::new(CondKind::Numeric, BUDGET);
        let pos = examples(&[input(0, 0, 1, 2)]);
        let neg = examples(&[input(0, 0, 3, 2)]);
        let mut rng = StdRng::seed_from_u64(6);
        let outcome = cond.synthesize(&ctx, true, &pos, &neg, &mut rng).unwrap();
        assert_eq!(outcome.status, SynthesisStatus::Success);

        let sibling = outcome.sibling.unwrap();
        match sibling.predicate() {
            Predicate::Numeric(Some(body)) => {
                assert_eq!(body.to_string(), "(> a b)");
            }
            other => panic!("expected numeric predicate, got {:?}", other),
        }
    }

    #[test]
    fn division_by_zero_counts_against_the_condition() {
        // A learned predicate `a / b == 0` with b == 0 must score as a
        // misprediction on both sides, never as a crash.
        let body = (waypoint_core::IntExpr::var("a") / waypoint_core::IntExpr::var("b")).eq_expr(0);
        let mut cond = Condition::new(CondKind::Numeric, BUDGET);
        cond.predicate = Predicate::Numeric(Some(body));

        let zero = input(0, 0, 1, 0);
        assert!(!cond.check_and_update(&zero, true));
        assert!(!cond.check_and_update(&zero, false));
        assert_eq!(*cond.cmat(), ConfusionMatrix::new(0, 0, 1, 1));
    }

    #[test]
    fn dynamic_threshold_relaxes_with_spent_budget() {
        let mut cond = Condition::new(CondKind::Numeric, BUDGET);
        cond.predicate = Predicate::Numeric(Some(waypoint_core::IntExpr::var("a").le(0)));
        // MCC of (9,9,1,1) is 0.8.
        cond.cmat = ConfusionMatrix::new(9, 9, 1, 1);
        let acc = cond.cmat.accuracy();
        assert!(acc > 0.6 && acc < 1.0);

        // Full budget: threshold is 1.0, condition not accurate.
        assert!(!cond.is_accurate(BUDGET, 0.6));
        // Drained budget: threshold collapses to the floor.
        cond.deduct_budget(BUDGET);
        assert!(cond.is_accurate(BUDGET, 0.6));
    }

    #[test]
    fn neglect_is_always_accurate_and_true() {
        let mut cond = Condition::new(CondKind::Neglect, BUDGET);
        assert!(cond.is_accurate(BUDGET, 0.6));
        assert!(cond.check_and_update(&input(0, 0, 0, 0), false));
    }
}
