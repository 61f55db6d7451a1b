//! Loop programs used by the CLI, the tests and the benchmarks

use super::{ClassDescr, Frame, Heap, JitLoop};
use crate::error::Result;
use crate::jit::{EntryPoint, SpecializationKey};
use crate::quasi_immut::ObjectId;

/// Sums a quasi-immutable field and bumps it every iteration:
///
/// ```text
/// while x > 0:            # greens: foo    reds: x, total
///     total += foo.a
///     foo.a += 1
///     x -= 1
/// ```
///
/// Each trace captures `foo.a` and then writes it, so every attempt aborts.
pub struct QuasiImmutCounter {
    entry: EntryPoint,
    foo: ObjectId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterState {
    pub x: i64,
    pub total: i64,
}

impl QuasiImmutCounter {
    /// Allocate a `Foo` with `a` quasi-immutable and set to `a`
    pub fn setup(heap: &mut Heap, a: i64) -> Result<Self> {
        let class = ClassDescr::new("Foo", &["a"], &["a?"])?;
        let foo = heap.alloc(&class, &[("a", a)])?;
        Ok(Self {
            entry: EntryPoint::new("quasi_immut_counter", &["foo"], &["x", "total"]),
            foo,
        })
    }

    pub fn foo(&self) -> ObjectId {
        self.foo
    }

    pub fn start(x: i64) -> CounterState {
        CounterState { x, total: 0 }
    }
}

impl JitLoop for QuasiImmutCounter {
    type State = CounterState;

    fn entry_point(&self) -> &EntryPoint {
        &self.entry
    }

    fn greens(&self, _state: &CounterState) -> SpecializationKey {
        self.entry.make_key([self.foo])
    }

    fn should_continue(&self, state: &CounterState) -> bool {
        state.x > 0
    }

    fn body(&mut self, frame: &mut Frame<'_>, state: &mut CounterState) -> Result<()> {
        let a = frame.getfield(self.foo, "a")?;
        state.total += a;
        frame.setfield(self.foo, "a", a + 1)?;
        state.x -= 1;
        Ok(())
    }
}

/// Counts to `m` with two green variables:
///
/// ```text
/// while i < m:            # greens: n, m    reds: i, total
///     total += n
///     i += 1
/// ```
pub struct GreenCounter {
    entry: EntryPoint,
    n: i64,
    m: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GreenState {
    pub i: i64,
    pub total: i64,
}

impl GreenCounter {
    /// Separate counters built from one `entry` share its specializations
    pub fn new(entry: &EntryPoint, n: i64, m: i64) -> Self {
        Self {
            entry: entry.clone(),
            n,
            m,
        }
    }

    pub fn entry_point() -> EntryPoint {
        EntryPoint::new("green_counter", &["n", "m"], &["i", "total"])
    }
}

impl JitLoop for GreenCounter {
    type State = GreenState;

    fn entry_point(&self) -> &EntryPoint {
        &self.entry
    }

    fn greens(&self, _state: &GreenState) -> SpecializationKey {
        self.entry.make_key([self.n, self.m])
    }

    fn should_continue(&self, state: &GreenState) -> bool {
        state.i < self.m
    }

    fn body(&mut self, _frame: &mut Frame<'_>, state: &mut GreenState) -> Result<()> {
        state.total += self.n;
        state.i += 1;
        Ok(())
    }
}

/// A loop whose branch flips partway through, forcing a bridge:
///
/// ```text
/// while i <= limit:       # greens: limit    reds: i
///     if i >= flip:
///         i += 2
///     i += 1
/// ```
pub struct BranchyCounter {
    entry: EntryPoint,
    limit: i64,
    flip: i64,
}

impl BranchyCounter {
    pub fn new(limit: i64, flip: i64) -> Self {
        Self {
            entry: EntryPoint::new("branchy_counter", &["limit"], &["i"]),
            limit,
            flip,
        }
    }
}

impl JitLoop for BranchyCounter {
    type State = i64;

    fn entry_point(&self) -> &EntryPoint {
        &self.entry
    }

    fn greens(&self, _state: &i64) -> SpecializationKey {
        self.entry.make_key([self.limit])
    }

    fn should_continue(&self, i: &i64) -> bool {
        *i <= self.limit
    }

    fn body(&mut self, frame: &mut Frame<'_>, i: &mut i64) -> Result<()> {
        if frame.branch(*i >= self.flip) {
            *i += 2;
        }
        *i += 1;
        Ok(())
    }
}

/// Weighted sum whose quasi-immutable weight changes once, while the loop
/// is already compiled:
///
/// ```text
/// while i < n:            # greens: cfg    reds: i, total
///     total += i * cfg.scale
///     if i == switch_at:
///         cfg.scale = new_scale
///     i += 1
/// ```
pub struct ScaledSum {
    entry: EntryPoint,
    cfg: ObjectId,
    n: i64,
    switch_at: i64,
    new_scale: i64,
}

impl ScaledSum {
    pub fn setup(heap: &mut Heap, scale: i64, n: i64, switch_at: i64, new_scale: i64) -> Result<Self> {
        let class = ClassDescr::new("Config", &["scale"], &["scale?"])?;
        let cfg = heap.alloc(&class, &[("scale", scale)])?;
        Ok(Self {
            entry: EntryPoint::new("scaled_sum", &["cfg"], &["i", "total"]),
            cfg,
            n,
            switch_at,
            new_scale,
        })
    }

    pub fn cfg(&self) -> ObjectId {
        self.cfg
    }
}

impl JitLoop for ScaledSum {
    type State = GreenState;

    fn entry_point(&self) -> &EntryPoint {
        &self.entry
    }

    fn greens(&self, _state: &GreenState) -> SpecializationKey {
        self.entry.make_key([self.cfg])
    }

    fn should_continue(&self, state: &GreenState) -> bool {
        state.i < self.n
    }

    fn body(&mut self, frame: &mut Frame<'_>, state: &mut GreenState) -> Result<()> {
        let scale = frame.getfield(self.cfg, "scale")?;
        state.total += state.i * scale;
        if frame.branch(state.i == self.switch_at) {
            frame.setfield(self.cfg, "scale", self.new_scale)?;
        }
        state.i += 1;
        Ok(())
    }
}
