//! Enum-parameter draws via an equality graph.
//!
//! Each enum parameter starts as its own node holding the set of values
//! the path conditions allow. Equality conditions merge nodes (values
//! intersect); inequality conditions add constraint edges. A draw is a
//! DFS backtracking assignment: each node picks a random value from its
//! allowed set minus the values its already-assigned neighbors took.
//!
//! Contradictions while building the graph (`x = y` and `x != y` on the
//! same pair, or an intersection running empty) are fatal: the caller's
//! hard conditions leave no enum assignment at all.

use std::collections::{BTreeMap, BTreeSet};

use rand::Rng;

use waypoint_act::{Condition, Predicate};
use waypoint_core::{Args, EnumBitVec, EqualityCondition, EqualityKind, InputSignature};

use crate::error::{SolveError, SolveResult};

type SetId = usize;

#[derive(Debug)]
struct EqualSet {
    params: BTreeSet<String>,
    candidates: EnumBitVec,
    inequal: BTreeSet<SetId>,
    assignment: Option<EnumBitVec>,
    traversed: Vec<SetId>,
}

/// Equality graph over the parameters of one enum group.
#[derive(Debug)]
pub struct EqualityGraph {
    // Merged sets leave a tombstone so ids stay stable.
    sets: Vec<Option<EqualSet>>,
    param_to_set: BTreeMap<String, SetId>,
}

impl EqualityGraph {
    pub fn new(
        candidates: Vec<EnumBitVec>,
        equalities: Vec<EqualityCondition>,
    ) -> SolveResult<Self> {
        let mut graph = Self {
            sets: Vec::new(),
            param_to_set: BTreeMap::new(),
        };
        for bv in candidates {
            let id = graph.sets.len();
            graph.param_to_set.insert(bv.name().to_string(), id);
            graph.sets.push(Some(EqualSet {
                params: BTreeSet::from([bv.name().to_string()]),
                candidates: bv,
                inequal: BTreeSet::new(),
                assignment: None,
                traversed: Vec::new(),
            }));
        }

        // Merge all equalities before connecting inequalities, so a
        // contradiction is found no matter the condition order.
        for eq in equalities.iter().filter(|e| e.kind == EqualityKind::Equal) {
            graph.merge(&eq.left, &eq.right)?;
        }
        for ne in equalities.iter().filter(|e| e.kind == EqualityKind::Inequal) {
            graph.connect(&ne.left, &ne.right)?;
        }
        graph.simplify();
        Ok(graph)
    }

    fn set(&self, id: SetId) -> &EqualSet {
        self.sets[id].as_ref().expect("merged-away equal set")
    }

    fn set_mut(&mut self, id: SetId) -> &mut EqualSet {
        self.sets[id].as_mut().expect("merged-away equal set")
    }

    fn merge(&mut self, left: &str, right: &str) -> SolveResult<()> {
        if left == right {
            return Ok(());
        }
        let l = self.param_to_set[left];
        let r = self.param_to_set[right];
        if l == r {
            return Ok(());
        }
        if self.set(l).inequal.contains(&r) || self.set(r).inequal.contains(&l) {
            return Err(SolveError::UnsatEnumConstraints(format!(
                "`{}` and `{}` are required both equal and unequal",
                left, right
            )));
        }

        let removed = self.sets[r].take().expect("merged-away equal set");

        // Retarget the removed set's constraint edges.
        for &neighbor in &removed.inequal {
            let n = self.set_mut(neighbor);
            n.inequal.remove(&r);
            n.inequal.insert(l);
        }

        let merged = self.set_mut(l);
        for param in &removed.params {
            merged.params.insert(param.clone());
        }
        merged.candidates.and_assign(&removed.candidates);
        merged.inequal.extend(removed.inequal.iter().copied());
        if merged.candidates.is_empty() {
            return Err(SolveError::UnsatEnumConstraints(format!(
                "no value satisfies every equality involving `{}`",
                left
            )));
        }

        for param in &removed.params {
            self.param_to_set.insert(param.clone(), l);
        }
        Ok(())
    }

    fn connect(&mut self, left: &str, right: &str) -> SolveResult<()> {
        if left == right {
            return Err(SolveError::UnsatEnumConstraints(format!(
                "`{}` is required unequal to itself",
                left
            )));
        }
        let l = self.param_to_set[left];
        let r = self.param_to_set[right];
        if l == r {
            // Both parameters were merged into one set earlier.
            return Err(SolveError::UnsatEnumConstraints(format!(
                "`{}` and `{}` are required both equal and unequal",
                left, right
            )));
        }
        self.set_mut(l).inequal.insert(r);
        self.set_mut(r).inequal.insert(l);
        Ok(())
    }

    /// Fixed-value propagation: a set with a single candidate removes that
    /// value from each constraint neighbor; edges between sets with
    /// disjoint candidates carry no information and are dropped.
    fn simplify(&mut self) {
        let ids: Vec<SetId> = self.live_ids();
        for &id in &ids {
            if self.set(id).candidates.count() == 1 {
                let fixed = self.set(id).candidates.clone();
                let neighbors: Vec<SetId> = self.set(id).inequal.iter().copied().collect();
                for n in neighbors {
                    self.set_mut(n).candidates.exclude(&fixed);
                    self.set_mut(n).inequal.remove(&id);
                }
                self.set_mut(id).inequal.clear();
            }
        }
        for &id in &ids {
            if self.sets[id].is_none() {
                continue;
            }
            let to_detach: Vec<SetId> = self
                .set(id)
                .inequal
                .iter()
                .copied()
                .filter(|&n| self.set(id).candidates.exclusive(&self.set(n).candidates))
                .collect();
            for n in to_detach {
                self.set_mut(id).inequal.remove(&n);
                self.set_mut(n).inequal.remove(&id);
            }
        }
    }

    fn live_ids(&self) -> Vec<SetId> {
        (0..self.sets.len())
            .filter(|&id| self.sets[id].is_some())
            .collect()
    }

    /// Draw one assignment for every parameter, or `None` when the
    /// constraint edges admit no assignment.
    pub fn draw<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<Args> {
        for id in self.live_ids() {
            self.unset_assignment(id);
        }
        for id in self.live_ids() {
            if !self.pick(id, rng) {
                return None;
            }
        }

        let mut args = Args::new();
        for id in self.live_ids() {
            let set = self.set(id);
            let value = set
                .assignment
                .as_ref()
                .expect("pick succeeded without an assignment")
                .values()[0];
            for param in &set.params {
                args.insert(param.clone(), value);
            }
        }
        Some(args)
    }

    /// Assign this set a value not taken by any assigned neighbor, then
    /// recurse into the unassigned neighbors. Backtracks over candidate
    /// values; clears everything it assigned on failure.
    fn pick<R: Rng + ?Sized>(&mut self, id: SetId, rng: &mut R) -> bool {
        if self.set(id).assignment.is_some() {
            return true;
        }

        let (fixed, to_be_fixed): (Vec<SetId>, Vec<SetId>) = self
            .set(id)
            .inequal
            .iter()
            .copied()
            .partition(|&n| self.set(n).assignment.is_some());

        let mut remaining = self.set(id).candidates.clone();
        for n in fixed {
            let taken = self.set(n).assignment.clone().unwrap();
            remaining.exclude(&taken);
        }

        let mut tried = self.set(id).candidates.clone();
        tried.clear();

        while let Some(picked) = remaining.extract_random_bit(rng) {
            tried.or_assign(&picked);
            self.set_mut(id).assignment = Some(picked);

            let mut success = true;
            for &n in &to_be_fixed {
                if self.pick(n, rng) {
                    self.set_mut(id).traversed.push(n);
                } else {
                    success = false;
                    break;
                }
            }
            if success {
                return true;
            }

            self.unset_assignment(id);
            remaining.exclude(&tried);
        }
        self.unset_assignment(id);
        false
    }

    fn unset_assignment(&mut self, id: SetId) {
        self.set_mut(id).assignment = None;
        let traversed = std::mem::take(&mut self.set_mut(id).traversed);
        for n in traversed {
            self.unset_assignment(n);
        }
    }
}

/// Solver for one enum group.
#[derive(Debug)]
struct EnumGroupSolver {
    params: Vec<String>,
    graph: Option<EqualityGraph>,
}

impl EnumGroupSolver {
    fn set_condition(
        &mut self,
        candidates: Vec<EnumBitVec>,
        equalities: Vec<EqualityCondition>,
    ) -> SolveResult<()> {
        self.graph = Some(EqualityGraph::new(candidates, equalities)?);
        Ok(())
    }

    fn draw<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<Args> {
        self.graph.as_mut().expect("set_condition not called").draw(rng)
    }
}

/// One equality graph per enum group; a full draw concatenates the group
/// draws.
pub struct EnumSolver {
    groups: Vec<EnumGroupSolver>,
    param_to_group: BTreeMap<String, usize>,
    /// All values allowed, per parameter; the baseline every condition set
    /// intersects into.
    full: Vec<EnumBitVec>,
}

impl EnumSolver {
    pub fn new(sig: &InputSignature) -> Self {
        let mut groups = Vec::new();
        let mut param_to_group = BTreeMap::new();
        for (i, group) in sig.enum_groups().iter().enumerate() {
            let params: Vec<String> = group.iter().map(|p| p.name().to_string()).collect();
            for param in &params {
                param_to_group.insert(param.clone(), i);
            }
            groups.push(EnumGroupSolver {
                params,
                graph: None,
            });
        }
        let mut solver = Self {
            groups,
            param_to_group,
            full: sig.full_bitvecs().iter().cloned().collect(),
        };
        // No conditions yet: every value is allowed.
        solver
            .set_condition(&[])
            .expect("unconstrained enum space cannot be unsatisfiable");
        solver
    }

    /// Install the path conditions: inclusion conditions intersect the
    /// allowed sets, equality conditions go to their group's graph.
    pub fn set_condition(&mut self, conds: &[Condition]) -> SolveResult<()> {
        let mut allowed: BTreeMap<String, EnumBitVec> = self
            .full
            .iter()
            .map(|bv| (bv.name().to_string(), bv.clone()))
            .collect();
        let mut equalities: Vec<Vec<EqualityCondition>> = vec![Vec::new(); self.groups.len()];

        for cond in conds {
            if cond.invalid() {
                continue;
            }
            match cond.predicate() {
                Predicate::Enum {
                    inclusion: Some(bv),
                    ..
                } => {
                    if let Some(entry) = allowed.get_mut(bv.name()) {
                        entry.and_assign(bv);
                    }
                }
                Predicate::Enum {
                    inclusion: None,
                    equality: Some(expr),
                } => {
                    let eq = expr
                        .to_equality_condition()
                        .map_err(|_| SolveError::BadEqualityShape(expr.pretty()))?;
                    let group = *self
                        .param_to_group
                        .get(&eq.left)
                        .ok_or_else(|| SolveError::UnknownVar(eq.left.clone()))?;
                    assert_eq!(self.param_to_group.get(&eq.right), Some(&group));
                    equalities[group].push(eq);
                }
                _ => {}
            }
        }

        for (i, group) in self.groups.iter_mut().enumerate() {
            let candidates: Vec<EnumBitVec> = group
                .params
                .iter()
                .map(|p| allowed[p].clone())
                .collect();
            group.set_condition(candidates, std::mem::take(&mut equalities[i]))?;
        }
        Ok(())
    }

    pub fn draw<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<Args> {
        let mut args = Args::new();
        for group in &mut self.groups {
            args.extend(group.draw(rng)?);
        }
        Some(args)
    }
}
