//! Coverage tracer: path-log capture, significance truncation, and
//! nondeterministic-PC discovery.
//!
//! One [`TracePC`] records the ordered PCIDs a single callback invocation
//! executes. Paths longer than the significant limit *S* keep a tail of up
//! to *S* further PCIDs for leaf reconstruction; everything beyond is
//! dropped. When the same input produces two different paths, the chunked
//! Myers diff in [`TracePC::check_diff`] marks the PCIDs that must differ
//! as nondeterministic, and the tracer filters them from then on.
//!
//! # ND discovery
//!
//! ```text
//! strip common prefix
//! loop:
//!     take one chunk (S/10) from each side
//!     shortest edit script over the chunk pair -> shadow bits
//!     mark shadowed PCIDs as ND (only up to half the common tokens on
//!         non-final chunks; the back of a chunk pair is unreliable)
//!     re-prune both full paths, strip the new common prefix
//!     stop when both sides are exhausted or the prefix reaches S
//! ```

use std::sync::{Arc, Mutex, OnceLock};

use crate::defs::{common_prefix_len, ExecPath, Pcid};

/// Production significant-prefix limit (PCIDs per path).
pub const MAX_SIGNIFICANT: usize = 1_000_000;

/// Path-length policy shared between the tracer and the coverage tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathLimits {
    max_significant: usize,
}

impl PathLimits {
    pub fn new(max_significant: usize) -> Self {
        assert!(max_significant >= 10, "significant limit too small");
        Self { max_significant }
    }

    pub fn max_significant(&self) -> usize {
        self.max_significant
    }

    pub fn max_tail(&self) -> usize {
        self.max_significant
    }

    pub fn max_total(&self) -> usize {
        self.max_significant + self.max_tail()
    }

    pub fn chunk(&self) -> usize {
        self.max_significant / 10
    }

    /// First *S* PCIDs.
    pub fn significant(&self, epath: &[Pcid]) -> ExecPath {
        if epath.len() <= self.max_significant {
            epath.to_vec()
        } else {
            epath[..self.max_significant].to_vec()
        }
    }

    /// Up to *S* PCIDs past the significant prefix.
    pub fn tail_of(&self, epath: &[Pcid]) -> ExecPath {
        if epath.len() <= self.max_significant {
            return ExecPath::new();
        }
        let len = (epath.len() - self.max_significant).min(self.max_tail());
        epath[self.max_significant..self.max_significant + len].to_vec()
    }

    /// Path equality on the significant prefix only.
    pub fn eq_significant(&self, left: &[Pcid], right: &[Pcid]) -> bool {
        if left.len() >= self.max_significant && right.len() >= self.max_significant {
            return left[..self.max_significant] == right[..self.max_significant];
        }
        left == right
    }

    /// The capture buffer was filled to the brim; the true path may be
    /// longer than what was recorded.
    pub fn truncated(&self, epath: &[Pcid]) -> bool {
        epath.len() == self.max_total()
    }

    /// Is `left` so much longer than `right` that it should replace it
    /// rather than count as a conflict? The thresholds are a heuristic
    /// carried over from the trace-capture design, not a tuned result.
    pub fn considerably_longer(&self, left: &[Pcid], right: &[Pcid]) -> bool {
        if left.len() <= right.len() || left.len() <= self.chunk() {
            return false;
        }
        left.len() > 2 * right.len() || left.len() - right.len() >= 2 * self.chunk()
    }
}

#[derive(Debug, Clone, Default)]
struct BitMap {
    words: Vec<u64>,
    len: usize,
}

impl BitMap {
    fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(64)],
            len,
        }
    }

    fn set(&mut self, idx: usize) {
        debug_assert!(idx < self.len);
        self.words[idx / 64] |= 1u64 << (idx % 64);
    }

    fn is_set(&self, idx: usize) -> bool {
        debug_assert!(idx < self.len);
        self.words[idx / 64] & (1u64 << (idx % 64)) != 0
    }

    fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }
}

/// The coverage tracer.
#[derive(Debug)]
pub struct TracePC {
    limits: PathLimits,
    num_guards: usize,
    covered: Option<BitMap>,
    nd: Option<BitMap>,
    log: Vec<Pcid>,
    tracing: bool,
}

impl Default for TracePC {
    fn default() -> Self {
        Self::new(PathLimits::new(MAX_SIGNIFICANT))
    }
}

impl TracePC {
    pub fn new(limits: PathLimits) -> Self {
        Self {
            limits,
            num_guards: 0,
            covered: None,
            nd: None,
            log: Vec::new(),
            tracing: false,
        }
    }

    /// Tracer for tests: a fixed guard count and a small significant limit.
    pub fn mock(num_guards: usize, max_significant: usize) -> Self {
        let mut tpc = Self::new(PathLimits::new(max_significant));
        tpc.num_guards = num_guards;
        tpc
    }

    pub fn limits(&self) -> PathLimits {
        self.limits
    }

    /// Assign guard ids `1..=N`. Guards already initialized (first slot
    /// nonzero) are left alone, per the sancov guard protocol.
    pub fn handle_init(&mut self, guards: &mut [u32]) {
        if guards.is_empty() || guards[0] != 0 {
            return;
        }
        for g in guards.iter_mut() {
            self.num_guards += 1;
            *g = self.num_guards as u32;
        }
    }

    pub fn num_instrumented(&self) -> usize {
        self.num_guards
    }

    pub fn trace_on(&mut self) {
        self.tracing = true;
    }

    pub fn trace_off(&mut self) {
        self.tracing = false;
    }

    pub fn clear_path_log(&mut self) {
        self.log.clear();
    }

    pub fn init_covered_map(&mut self) {
        if self.covered.is_none() {
            self.covered = Some(BitMap::new(self.num_guards));
        }
    }

    fn nd_map(&mut self) -> &mut BitMap {
        let guards = self.num_guards;
        self.nd.get_or_insert_with(|| BitMap::new(guards))
    }

    pub fn is_nd(&self, pcid: Pcid) -> bool {
        match &self.nd {
            Some(map) => map.is_set(pcid as usize - 1),
            None => false,
        }
    }

    /// Record one executed PCID. Covered accounting happens even for ND
    /// locations; only the path log filters them.
    pub fn append(&mut self, pcid: Pcid) {
        if !self.tracing {
            return;
        }
        if let Some(covered) = &mut self.covered {
            covered.set(pcid as usize - 1);
        }
        if self.log.len() < self.limits.max_total() && !self.is_nd(pcid) {
            self.log.push(pcid);
        }
    }

    pub fn path_log(&self) -> ExecPath {
        self.log.clone()
    }

    pub fn num_covered(&self) -> usize {
        self.covered
            .as_ref()
            .expect("covered map not initialized")
            .count()
    }

    pub fn num_nd(&self) -> usize {
        self.nd.as_ref().map_or(0, BitMap::count)
    }

    /// Drop every ND-marked PCID from a path.
    pub fn prune(&self, epath: &[Pcid]) -> ExecPath {
        match &self.nd {
            Some(map) => epath
                .iter()
                .copied()
                .filter(|&p| !map.is_set(p as usize - 1))
                .collect(),
            None => epath.to_vec(),
        }
    }

    /// Mark every PCID of `epath` as nondeterministic. Test support.
    pub fn mark_nd(&mut self, epath: &[Pcid]) {
        let map = self.nd_map();
        for &p in epath {
            map.set(p as usize - 1);
        }
    }

    pub fn significant(&self, epath: &[Pcid]) -> ExecPath {
        self.limits.significant(epath)
    }

    pub fn tail_of(&self, epath: &[Pcid]) -> ExecPath {
        self.limits.tail_of(epath)
    }

    pub fn eq_significant(&self, left: &[Pcid], right: &[Pcid]) -> bool {
        self.limits.eq_significant(left, right)
    }

    pub fn truncated(&self, epath: &[Pcid]) -> bool {
        self.limits.truncated(epath)
    }

    pub fn considerably_longer(&self, left: &[Pcid], right: &[Pcid]) -> bool {
        self.limits.considerably_longer(left, right)
    }

    /// Discover new nondeterministic PCIDs from two paths produced by the
    /// same input. See the module doc for the loop structure.
    pub fn check_diff(&mut self, left: &[Pcid], right: &[Pcid]) {
        self.nd_map();

        let mut left_pruned = left.to_vec();
        let mut right_pruned = right.to_vec();
        let common = strip_common_prefix(&mut left_pruned, &mut right_pruned);
        assert!(common < self.limits.max_significant());

        loop {
            let chunk = self.limits.chunk();
            let last_iter = left_pruned.len() <= chunk || right_pruned.len() <= chunk;
            let left_chunk: &[Pcid] = if last_iter {
                &left_pruned
            } else {
                &left_pruned[..chunk]
            };
            let right_chunk: &[Pcid] = if last_iter {
                &right_pruned
            } else {
                &right_pruned[..chunk]
            };

            let mut shadow_left = vec![false; left_chunk.len()];
            let mut shadow_right = vec![false; right_chunk.len()];
            diff_rec(
                left_chunk,
                0,
                left_chunk.len(),
                right_chunk,
                0,
                right_chunk.len(),
                &mut shadow_left,
                &mut shadow_right,
            );
            self.add_nd(left_chunk, &shadow_left, last_iter);
            self.add_nd(right_chunk, &shadow_right, last_iter);

            left_pruned = self.prune(left);
            right_pruned = self.prune(right);
            let common = strip_common_prefix(&mut left_pruned, &mut right_pruned);
            if common >= self.limits.max_significant()
                || (left_pruned.is_empty() && right_pruned.is_empty())
            {
                break;
            }
        }
    }

    /// Apply shadow bits to the ND map. On non-final chunks, only shadows
    /// seen before half the common tokens are trusted: tokens near the end
    /// of a chunk pair align arbitrarily.
    fn add_nd(&mut self, epath: &[Pcid], shadow: &[bool], do_all: bool) {
        assert_eq!(epath.len(), shadow.len());

        if do_all {
            let map = self.nd_map();
            for (i, &p) in epath.iter().enumerate() {
                if shadow[i] {
                    map.set(p as usize - 1);
                }
            }
            return;
        }

        let common_len = shadow.iter().filter(|&&s| !s).count();
        let common_half = common_len.div_ceil(2);

        let map = self.nd_map();
        let mut common_seen = 0;
        for (i, &p) in epath.iter().enumerate() {
            if common_seen > common_half {
                break;
            }
            if shadow[i] {
                map.set(p as usize - 1);
            } else {
                common_seen += 1;
            }
        }
    }
}

fn strip_common_prefix(left: &mut ExecPath, right: &mut ExecPath) -> usize {
    let common = common_prefix_len(left, right);
    left.drain(..common);
    right.drain(..common);
    common
}

/// Myers shortest-edit-script, recursive middle-snake form. Every position
/// not on the snake path must differ between the two sides; those get a
/// shadow bit.
#[allow(clippy::too_many_arguments)]
fn diff_rec(
    left: &[Pcid],
    left_start: usize,
    left_size: usize,
    right: &[Pcid],
    right_start: usize,
    right_size: usize,
    shadow_left: &mut [bool],
    shadow_right: &mut [bool],
) {
    if left_size == 0 {
        for s in &mut shadow_right[right_start..right_start + right_size] {
            *s = true;
        }
        return;
    }
    if right_size == 0 {
        for s in &mut shadow_left[left_start..left_start + left_size] {
            *s = true;
        }
        return;
    }

    let (d, x, y, u, v) = find_middle_snake(left, left_start, left_size, right, right_start, right_size);
    if d > 1 {
        diff_rec(left, left_start, x, right, right_start, y, shadow_left, shadow_right);
        diff_rec(
            left,
            left_start + u,
            left_size - u,
            right,
            right_start + v,
            right_size - v,
            shadow_left,
            shadow_right,
        );
    } else if d == 1 {
        // One edit. Tie-break: shadow the shorter side's first differing
        // position and its last position; symmetric when lengths match.
        if left_size < right_size {
            for i in 0..left_size {
                if left[left_start + i] != right[right_start + i] {
                    shadow_right[right_start + i] = true;
                    break;
                }
            }
            shadow_right[right_start + right_size - 1] = true;
        } else {
            for i in 0..right_size {
                if right[right_start + i] != left[left_start + i] {
                    shadow_left[left_start + i] = true;
                    break;
                }
            }
            shadow_left[left_start + left_size - 1] = true;
        }
    }
}

/// Diagonal array indexed by `k` in `[-max, max)`.
struct KVec(Vec<i64>);

impl KVec {
    fn new(len: usize) -> Self {
        KVec(vec![0; len])
    }

    fn get(&self, k: i64) -> i64 {
        let idx = if k >= 0 { k } else { self.0.len() as i64 + k };
        self.0[idx as usize]
    }

    fn set(&mut self, k: i64, v: i64) {
        let idx = if k >= 0 { k } else { self.0.len() as i64 + k };
        self.0[idx as usize] = v;
    }
}

/// Myers O((M+N)D) middle snake. Returns `(d, x, y, u, v)`: the edit
/// distance, the snake's start in both sides, and its end in both sides.
fn find_middle_snake(
    left: &[Pcid],
    left_start: usize,
    left_size: usize,
    right: &[Pcid],
    right_start: usize,
    right_size: usize,
) -> (usize, usize, usize, usize, usize) {
    let n = left_size as i64;
    let m = right_size as i64;
    let max = n + m;
    assert!(max > 0);
    let delta = n - m;

    let mut vf = KVec::new((max * 2) as usize);
    let mut vb = KVec::new((max * 2) as usize);
    vf.set(1, 0);
    vb.set(1, 0);

    let d_max = (max + 1) / 2;
    for d in 0..=d_max {
        let mut k = -d;
        while k <= d {
            let mut x = if k == -d || (k != d && vf.get(k - 1) < vf.get(k + 1)) {
                vf.get(k + 1)
            } else {
                vf.get(k - 1) + 1
            };
            let mut y = x - k;
            let (x_i, y_i) = (x, y);
            while x < n
                && y < m
                && left[left_start + x as usize] == right[right_start + y as usize]
            {
                x += 1;
                y += 1;
            }
            vf.set(k, x);
            if delta % 2 != 0 && (-(k - delta)) >= -(d - 1) && (-(k - delta)) <= (d - 1)
                && vf.get(k) + vb.get(-(k - delta)) >= n
            {
                return (
                    (2 * d - 1) as usize,
                    x_i as usize,
                    y_i as usize,
                    x as usize,
                    y as usize,
                );
            }
            k += 2;
        }
        let mut k = -d;
        while k <= d {
            let mut x = if k == -d || (k != d && vb.get(k - 1) < vb.get(k + 1)) {
                vb.get(k + 1)
            } else {
                vb.get(k - 1) + 1
            };
            let mut y = x - k;
            let (x_i, y_i) = (x, y);
            while x < n
                && y < m
                && left[left_start + (n - x - 1) as usize]
                    == right[right_start + (m - y - 1) as usize]
            {
                x += 1;
                y += 1;
            }
            vb.set(k, x);
            if delta % 2 == 0 && (-(k - delta)) >= -d && (-(k - delta)) <= d
                && vb.get(k) + vf.get(-(k - delta)) >= n
            {
                return (
                    (2 * d) as usize,
                    (n - x) as usize,
                    (m - y) as usize,
                    (n - x_i) as usize,
                    (m - y_i) as usize,
                );
            }
            k += 2;
        }
    }
    unreachable!("middle snake search must terminate within d_max edits");
}

static GLOBAL_TRACER: OnceLock<Arc<Mutex<TracePC>>> = OnceLock::new();

/// The process-wide tracer fed by the coverage-guard hooks. Lazily created
/// because guard initialization runs before `main`.
pub fn global_tracer() -> Arc<Mutex<TracePC>> {
    GLOBAL_TRACER
        .get_or_init(|| Arc::new(Mutex::new(TracePC::default())))
        .clone()
}

/// Run the target section of a fuzz callback under tracing.
///
/// The engine disables tracing around everything else, so only PCIDs
/// executed inside this call land in the path log.
pub fn traced<R>(f: impl FnOnce() -> R) -> R {
    let tracer = global_tracer();
    {
        let mut t = tracer.lock().unwrap();
        t.trace_on();
        t.clear_path_log();
    }
    let result = f();
    tracer.lock().unwrap().trace_off();
    result
}

/// SanitizerCoverage trace-pc-guard hooks. The compiler emits calls to
/// these from every instrumented edge when building with
/// `-Cpasses=sancov-module` / `-Cllvm-args=-sanitizer-coverage-level=...`.
pub mod hooks {
    use super::global_tracer;

    /// # Safety
    ///
    /// `guard` must point at a live guard slot created by the
    /// instrumentation pass.
    #[no_mangle]
    pub unsafe extern "C" fn __sanitizer_cov_trace_pc_guard(guard: *mut u32) {
        let pcid = *guard;
        if pcid == 0 {
            return;
        }
        global_tracer().lock().unwrap().append(pcid);
    }

    /// # Safety
    ///
    /// `start..stop` must delimit the module's guard array.
    #[no_mangle]
    pub unsafe extern "C" fn __sanitizer_cov_trace_pc_guard_init(start: *mut u32, stop: *mut u32) {
        if start == stop {
            return;
        }
        let len = stop.offset_from(start) as usize;
        let guards = std::slice::from_raw_parts_mut(start, len);
        global_tracer().lock().unwrap().handle_init(guards);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock() -> TracePC {
        TracePC::mock(100, 1000)
    }

    #[test]
    fn append_respects_tracing_flag_and_capacity() {
        let mut tpc = TracePC::mock(100, 10);
        tpc.append(1);
        assert!(tpc.path_log().is_empty());

        tpc.trace_on();
        for p in 1..=30 {
            tpc.append((p % 9 + 1) as Pcid);
        }
        // capacity is significant + tail = 20
        assert_eq!(tpc.path_log().len(), 20);
    }

    #[test]
    fn significant_and_tail_split() {
        let limits = PathLimits::new(10);
        let path: ExecPath = (1..=25).collect();
        assert_eq!(limits.significant(&path), (1..=10).collect::<ExecPath>());
        assert_eq!(limits.tail_of(&path), (11..=20).collect::<ExecPath>());

        let short: ExecPath = (1..=5).collect();
        assert_eq!(limits.significant(&short), short);
        assert!(limits.tail_of(&short).is_empty());
    }

    #[test]
    fn eq_significant_compares_prefix_only() {
        let limits = PathLimits::new(10);
        let mut a: ExecPath = (1..=12).collect();
        let b: ExecPath = (1..=15).collect();
        assert!(limits.eq_significant(&a, &b));
        a[3] = 99;
        assert!(!limits.eq_significant(&a, &b));
        // Short paths compare exactly.
        assert!(!limits.eq_significant(&[1, 2], &[1, 2, 3]));
    }

    #[test]
    fn considerably_longer_thresholds() {
        let limits = PathLimits::new(1000); // chunk = 100
        let short: ExecPath = vec![1; 150];
        let double: ExecPath = vec![1; 301];
        let offset: ExecPath = vec![1; 350];
        let slightly: ExecPath = vec![1; 160];
        assert!(limits.considerably_longer(&double, &short));
        assert!(limits.considerably_longer(&offset, &short));
        assert!(!limits.considerably_longer(&slightly, &short));
        assert!(!limits.considerably_longer(&short, &double));
        // Left side at or below one chunk never qualifies.
        assert!(!limits.considerably_longer(&vec![1; 90], &vec![1; 10]));
    }

    #[test]
    fn prune_removes_marked_pcids() {
        let mut tpc = mock();
        tpc.mark_nd(&[2, 4]);
        assert_eq!(tpc.prune(&[1, 2, 3, 4, 5]), vec![1, 3, 5]);
    }

    #[test]
    fn check_diff_marks_inserted_token() {
        let mut tpc = mock();
        // Same input, one run took an extra branch at pcid 7. The one-edit
        // tie-break also shadows the longer side's last position (4); the
        // rest of the shared path survives.
        tpc.check_diff(&[1, 2, 7, 3, 4], &[1, 2, 3, 4]);
        assert!(tpc.is_nd(7));
        assert!(tpc.is_nd(4));
        assert!(!tpc.is_nd(1));
        assert!(!tpc.is_nd(3));
        assert_eq!(tpc.prune(&[1, 2, 7, 3, 4]), tpc.prune(&[1, 2, 3, 4]));
        assert_eq!(tpc.prune(&[1, 2, 7, 3, 4]), vec![1, 2, 3]);
    }

    #[test]
    fn check_diff_trailing_insertion_spares_the_common_path() {
        let mut tpc = mock();
        // Extra token at the very end: only the insertion is shadowed.
        tpc.check_diff(&[1, 2, 3, 7], &[1, 2, 3]);
        assert!(tpc.is_nd(7));
        assert!(!tpc.is_nd(2));
        assert!(!tpc.is_nd(3));
        assert_eq!(tpc.prune(&[1, 2, 3, 7]), vec![1, 2, 3]);
    }

    #[test]
    fn check_diff_marks_substituted_token_on_both_sides() {
        let mut tpc = mock();
        tpc.check_diff(&[1, 5, 3], &[1, 6, 3]);
        assert!(tpc.is_nd(5));
        assert!(tpc.is_nd(6));
        assert_eq!(tpc.prune(&[1, 5, 3]), tpc.prune(&[1, 6, 3]));
    }

    #[test]
    fn check_diff_converges_on_alternating_noise() {
        let mut tpc = mock();
        let left: ExecPath = vec![1, 10, 2, 11, 3, 12, 4];
        let right: ExecPath = vec![1, 13, 2, 14, 3, 15, 4];
        tpc.check_diff(&left, &right);
        // All six noise tokens are discovered; the shared backbone
        // survives (minus the trailing token the one-edit tie-break
        // conservatively claims along with the last substitution).
        for noise in 10..=15 {
            assert!(tpc.is_nd(noise));
        }
        assert!(!tpc.is_nd(1) && !tpc.is_nd(2) && !tpc.is_nd(3));
        assert_eq!(tpc.prune(&left), tpc.prune(&right));
        assert_eq!(tpc.prune(&left), vec![1, 2, 3]);
    }

    #[test]
    fn middle_snake_on_equal_paths_is_zero_edits() {
        let path: ExecPath = vec![1, 2, 3];
        let (d, ..) = find_middle_snake(&path, 0, 3, &path, 0, 3);
        assert_eq!(d, 0);
    }

    #[test]
    fn covered_accounting() {
        let mut tpc = mock();
        tpc.init_covered_map();
        tpc.trace_on();
        for p in [1, 2, 2, 3] {
            tpc.append(p);
        }
        assert_eq!(tpc.num_covered(), 3);
        assert_eq!(tpc.num_instrumented(), 100);
    }

    #[test]
    fn guard_init_assigns_ids_once() {
        let mut tpc = TracePC::new(PathLimits::new(10));
        let mut guards = [0u32; 4];
        tpc.handle_init(&mut guards);
        assert_eq!(guards, [1, 2, 3, 4]);
        // A second init call on the same (now nonzero) array is a no-op.
        tpc.handle_init(&mut guards);
        assert_eq!(tpc.num_instrumented(), 4);
    }
}
