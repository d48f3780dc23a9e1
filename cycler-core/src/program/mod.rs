//! Program data model: steps, cycles, and the fixed-capacity pools that own
//! them.
//!
//! A program is a tree of components. [`Step`] is the leaf (one temperature
//! target with ramp/hold durations) and [`Cycle`] is the composite (an
//! ordered sequence of child components repeated `repeat_count` times).
//! Both live in generation-checked arenas sized for the worst-case program
//! the firmware must support; nothing in this module allocates.
//!
//! Components reference each other by [`Handle`], never by pointer. A
//! handle records the pool generation it was allocated under, so any access
//! after a pool reset is a checked [`StaleHandle`] failure instead of a
//! dangling read.

use core::fmt;
use core::marker::PhantomData;
use core::time::Duration;

use heapless::{String, Vec};

/// Worst-case number of steps a single program may contain, including the
/// final sentinel.
pub const STEP_POOL_CAPACITY: usize = 20;

/// Worst-case number of cycles a single program may contain, including the
/// implicit root.
pub const CYCLE_POOL_CAPACITY: usize = 4;

/// Ordered components a single cycle may hold.
pub const MAX_CYCLE_COMPONENTS: usize = 16;

/// Bound on step display names.
pub const MAX_STEP_NAME: usize = 16;

/// Bound on the flattened program-definition stream.
pub const MAX_SPEC_ITEMS: usize = 32;

/// Bounded step name.
pub type StepName = String<MAX_STEP_NAME>;

/// Copies `name` into a bounded step name.
pub(crate) fn bounded_name(name: &str) -> Result<StepName, BuildError> {
    let mut bounded = StepName::new();
    bounded
        .push_str(name)
        .map_err(|_| BuildError::NameTooLong)?;
    Ok(bounded)
}

/// Index-plus-generation reference into a [`ComponentPool`].
pub struct Handle<T> {
    index: u8,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    const fn new(index: u8, generation: u32) -> Self {
        Self {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    /// Raw slot index, for diagnostics only.
    #[must_use]
    pub const fn index(self) -> u8 {
        self.index
    }
}

impl<T> Copy for Handle<T> {}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}@{})", self.index, self.generation)
    }
}

/// Handle to a pooled [`Step`].
pub type StepHandle = Handle<Step>;

/// Handle to a pooled [`Cycle`].
pub type CycleHandle = Handle<Cycle>;

/// Tagged reference to either kind of program component.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ComponentHandle {
    Step(StepHandle),
    Cycle(CycleHandle),
}

/// Error returned when a pool has no free slots left.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PoolExhausted;

impl fmt::Display for PoolExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("component pool exhausted")
    }
}

/// Error returned when a handle outlives the pool generation it was
/// allocated under.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StaleHandle;

impl fmt::Display for StaleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("stale component handle")
    }
}

/// Fixed-capacity arena with a high-water allocation cursor.
///
/// `reset` is O(1): it clears the cursor and bumps the generation, which
/// invalidates every outstanding handle at once. Slots are never freed
/// individually.
#[derive(Clone, Debug)]
pub struct ComponentPool<T, const N: usize> {
    slots: Vec<T, N>,
    generation: u32,
}

impl<T, const N: usize> Default for ComponentPool<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> ComponentPool<T, N> {
    /// Creates an empty pool.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            generation: 0,
        }
    }

    /// Allocates a slot for `value`, returning its handle.
    pub fn allocate(&mut self, value: T) -> Result<Handle<T>, PoolExhausted> {
        let index = self.slots.len();
        self.slots.push(value).map_err(|_| PoolExhausted)?;
        Ok(Handle::new(index as u8, self.generation))
    }

    /// Resolves a handle against the current generation.
    pub fn get(&self, handle: Handle<T>) -> Result<&T, StaleHandle> {
        if handle.generation != self.generation {
            return Err(StaleHandle);
        }
        self.slots.get(handle.index as usize).ok_or(StaleHandle)
    }

    /// Mutable variant of [`ComponentPool::get`].
    pub fn get_mut(&mut self, handle: Handle<T>) -> Result<&mut T, StaleHandle> {
        if handle.generation != self.generation {
            return Err(StaleHandle);
        }
        self.slots.get_mut(handle.index as usize).ok_or(StaleHandle)
    }

    /// Invalidates all slots without running per-slot teardown.
    pub fn reset(&mut self) {
        self.slots.clear();
        self.generation = self.generation.wrapping_add(1);
    }

    /// Number of allocated slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` when nothing has been allocated this generation.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Total slot capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Current pool generation.
    #[must_use]
    pub const fn generation(&self) -> u32 {
        self.generation
    }
}

/// A single temperature target with ramp and hold durations.
#[derive(Clone, Debug, PartialEq)]
pub struct Step {
    name: StepName,
    target_temp: f32,
    ramp_duration: Duration,
    hold_duration: Duration,
    is_final: bool,
}

impl Step {
    /// Creates a step. A zero `ramp_duration` means "as fast as possible".
    pub fn new(
        name: &str,
        target_temp: f32,
        ramp_duration: Duration,
        hold_duration: Duration,
    ) -> Result<Self, BuildError> {
        Ok(Self {
            name: bounded_name(name)?,
            target_temp,
            ramp_duration,
            hold_duration,
            is_final: false,
        })
    }

    /// The end-of-program sentinel yielded once per full traversal.
    #[must_use]
    pub fn final_marker() -> Self {
        Self {
            name: StepName::new(),
            target_temp: 0.0,
            ramp_duration: Duration::ZERO,
            hold_duration: Duration::ZERO,
            is_final: true,
        }
    }

    /// Step display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Target temperature in degrees Celsius.
    #[must_use]
    pub const fn target_temp(&self) -> f32 {
        self.target_temp
    }

    /// Declared ramp duration; zero demotes the ramp to an uncontrolled
    /// fast ramp.
    #[must_use]
    pub const fn ramp_duration(&self) -> Duration {
        self.ramp_duration
    }

    /// Hold duration once the target is reached.
    #[must_use]
    pub const fn hold_duration(&self) -> Duration {
        self.hold_duration
    }

    /// Returns `true` for the end-of-program sentinel.
    #[must_use]
    pub const fn is_final(&self) -> bool {
        self.is_final
    }

    /// Demotes the step to an uncontrolled fast ramp. Applied by program
    /// preprocessing when the declared ramp is physically unachievable.
    pub(crate) fn clear_ramp(&mut self) {
        self.ramp_duration = Duration::ZERO;
    }
}

/// An ordered sequence of components repeated `repeat_count` times.
///
/// The iteration cursor lives inside the cycle so that nested repeats
/// survive across [`Program::next_step`] calls without any heap state.
#[derive(Clone, Debug, PartialEq)]
pub struct Cycle {
    components: Vec<ComponentHandle, MAX_CYCLE_COMPONENTS>,
    repeat_count: u16,
    position: usize,
    current_repeat: u16,
    child_active: bool,
}

impl Cycle {
    /// Creates an empty cycle repeating `repeat_count` times.
    #[must_use]
    pub const fn new(repeat_count: u16) -> Self {
        Self {
            components: Vec::new(),
            repeat_count,
            position: 0,
            current_repeat: 0,
            child_active: false,
        }
    }

    /// Appends a component to the ordered sequence.
    pub(crate) fn add_component(&mut self, handle: ComponentHandle) -> Result<(), BuildError> {
        self.components
            .push(handle)
            .map_err(|_| BuildError::TooManyComponents)
    }

    /// Number of times this cycle runs.
    #[must_use]
    pub const fn repeat_count(&self) -> u16 {
        self.repeat_count
    }

    /// Number of direct child components.
    #[must_use]
    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    /// One-based repeat currently in progress, clamped to `repeat_count`
    /// once the cycle is exhausted. Used for progress display only.
    #[must_use]
    pub fn current_cycle(&self) -> u16 {
        if self.current_repeat >= self.repeat_count {
            self.repeat_count
        } else {
            self.current_repeat + 1
        }
    }

    /// Rewinds the iteration cursor. Children are rewound lazily as the
    /// traversal re-enters them.
    pub(crate) fn begin(&mut self) {
        self.position = 0;
        self.current_repeat = 0;
        self.child_active = false;
    }
}

/// Both arenas behind one façade, since every program spans the two.
#[derive(Clone, Debug)]
pub struct ProgramPools {
    steps: ComponentPool<Step, STEP_POOL_CAPACITY>,
    cycles: ComponentPool<Cycle, CYCLE_POOL_CAPACITY>,
}

impl Default for ProgramPools {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgramPools {
    /// Creates empty pools.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            steps: ComponentPool::new(),
            cycles: ComponentPool::new(),
        }
    }

    /// Step arena.
    #[must_use]
    pub const fn steps(&self) -> &ComponentPool<Step, STEP_POOL_CAPACITY> {
        &self.steps
    }

    /// Mutable step arena.
    pub const fn steps_mut(&mut self) -> &mut ComponentPool<Step, STEP_POOL_CAPACITY> {
        &mut self.steps
    }

    /// Cycle arena.
    #[must_use]
    pub const fn cycles(&self) -> &ComponentPool<Cycle, CYCLE_POOL_CAPACITY> {
        &self.cycles
    }

    /// Mutable cycle arena.
    pub const fn cycles_mut(&mut self) -> &mut ComponentPool<Cycle, CYCLE_POOL_CAPACITY> {
        &mut self.cycles
    }

    /// Invalidates every step and cycle at once.
    pub fn reset(&mut self) {
        self.steps.reset();
        self.cycles.reset();
    }
}

/// Outcome of pulling the next leaf out of a cycle subtree.
enum CycleYield {
    Step(StepHandle),
    Exhausted,
}

/// Depth-first, repeat-aware traversal of one cycle subtree.
///
/// When the child sequence is exhausted the repeat counter advances; once
/// `repeat_count` passes have completed the cycle reports exhaustion to its
/// parent and stays exhausted until rewound.
fn next_step_in(pools: &mut ProgramPools, handle: CycleHandle) -> Result<CycleYield, StaleHandle> {
    loop {
        let (len, position, child_active) = {
            let cycle = pools.cycles.get(handle)?;
            (cycle.components.len(), cycle.position, cycle.child_active)
        };

        if position >= len {
            let cycle = pools.cycles.get_mut(handle)?;
            if cycle.current_repeat < cycle.repeat_count {
                cycle.current_repeat += 1;
            }
            if cycle.current_repeat >= cycle.repeat_count {
                return Ok(CycleYield::Exhausted);
            }
            cycle.position = 0;
            continue;
        }

        let component = pools.cycles.get(handle)?.components[position];
        match component {
            ComponentHandle::Step(step) => {
                pools.cycles.get_mut(handle)?.position = position + 1;
                return Ok(CycleYield::Step(step));
            }
            ComponentHandle::Cycle(child) => {
                if !child_active {
                    pools.cycles.get_mut(child)?.begin();
                    pools.cycles.get_mut(handle)?.child_active = true;
                }
                match next_step_in(pools, child)? {
                    CycleYield::Step(step) => return Ok(CycleYield::Step(step)),
                    CycleYield::Exhausted => {
                        let cycle = pools.cycles.get_mut(handle)?;
                        cycle.child_active = false;
                        cycle.position = position + 1;
                    }
                }
            }
        }
    }
}

/// An installed program: the root cycle plus the final sentinel.
#[derive(Clone, Debug, PartialEq)]
pub struct Program {
    root: CycleHandle,
    display_cycle: CycleHandle,
    final_step: StepHandle,
    final_emitted: bool,
}

impl Program {
    /// Root cycle of the program tree.
    #[must_use]
    pub const fn root(&self) -> CycleHandle {
        self.root
    }

    /// The cycle chosen to represent progress: the immediate child cycle
    /// with the largest repeat count, or the root when there is none.
    #[must_use]
    pub const fn display_cycle(&self) -> CycleHandle {
        self.display_cycle
    }

    /// Rewinds the traversal to the first step. Idempotent.
    pub fn begin_iteration(&mut self, pools: &mut ProgramPools) -> Result<(), StaleHandle> {
        self.final_emitted = false;
        pools.cycles.get_mut(self.root)?.begin();
        Ok(())
    }

    /// Produces the next flattened leaf step.
    ///
    /// After the last real step the final sentinel is yielded exactly once,
    /// then the traversal reports `None` until rewound.
    pub fn next_step(&mut self, pools: &mut ProgramPools) -> Result<Option<StepHandle>, StaleHandle> {
        match next_step_in(pools, self.root)? {
            CycleYield::Step(step) => Ok(Some(step)),
            CycleYield::Exhausted => {
                if self.final_emitted {
                    Ok(None)
                } else {
                    self.final_emitted = true;
                    Ok(Some(self.final_step))
                }
            }
        }
    }
}

/// Leaf description inside a [`ProgramSpec`].
#[derive(Clone, Debug, PartialEq)]
pub struct StepSpec {
    pub name: StepName,
    pub target_temp: f32,
    pub ramp_duration: Duration,
    pub hold_duration: Duration,
}

impl StepSpec {
    /// Creates a step description, validating the name bound.
    pub fn new(
        name: &str,
        target_temp: f32,
        ramp_duration: Duration,
        hold_duration: Duration,
    ) -> Result<Self, BuildError> {
        Ok(Self {
            name: bounded_name(name)?,
            target_temp,
            ramp_duration,
            hold_duration,
        })
    }
}

/// One token of the flattened program definition.
///
/// A definition is a preorder walk of the intended tree: `BeginCycle`
/// opens a nested cycle, `EndCycle` closes the innermost open one, and
/// `Step` attaches a leaf to the innermost open cycle (or the root).
#[derive(Clone, Debug, PartialEq)]
pub enum SpecItem {
    Step(StepSpec),
    BeginCycle(u16),
    EndCycle,
}

/// Bounded program definition stream.
pub type ProgramSpec = Vec<SpecItem, MAX_SPEC_ITEMS>;

/// Which arena ran out during a build.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PoolKind {
    Step,
    Cycle,
}

/// Errors detected while building a program from its definition.
///
/// Any error rejects the whole program; the caller resets the pools so no
/// truncated program can run.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BuildError {
    /// The definition needs more steps or cycles than the pools hold.
    PoolExhausted(PoolKind),
    /// A single cycle holds more than [`MAX_CYCLE_COMPONENTS`] components.
    TooManyComponents,
    /// `BeginCycle`/`EndCycle` tokens do not pair up.
    UnbalancedSpec,
    /// The definition contains no steps at all.
    EmptyProgram,
    /// A step name exceeds [`MAX_STEP_NAME`].
    NameTooLong,
    /// A cycle declares zero repeats.
    ZeroRepeatCount,
    /// A freshly allocated handle failed to resolve. Indicates pool misuse
    /// by the caller, not a malformed definition.
    StaleHandle,
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::PoolExhausted(PoolKind::Step) => f.write_str("step pool exhausted"),
            BuildError::PoolExhausted(PoolKind::Cycle) => f.write_str("cycle pool exhausted"),
            BuildError::TooManyComponents => f.write_str("too many components in one cycle"),
            BuildError::UnbalancedSpec => f.write_str("unbalanced cycle markers"),
            BuildError::EmptyProgram => f.write_str("program has no steps"),
            BuildError::NameTooLong => f.write_str("step name too long"),
            BuildError::ZeroRepeatCount => f.write_str("cycle repeat count is zero"),
            BuildError::StaleHandle => f.write_str("stale handle during build"),
        }
    }
}

impl From<StaleHandle> for BuildError {
    fn from(_: StaleHandle) -> Self {
        BuildError::StaleHandle
    }
}

/// Builds a program into freshly reset pools.
///
/// The definition is validated as it is consumed; on any error the caller
/// must treat the pools as dirty and reset them. On success the returned
/// program owns nothing — the pools do — but every handle inside it is
/// valid for the current generation.
pub fn build_program(pools: &mut ProgramPools, spec: &ProgramSpec) -> Result<Program, BuildError> {
    let root = pools
        .cycles
        .allocate(Cycle::new(1))
        .map_err(|PoolExhausted| BuildError::PoolExhausted(PoolKind::Cycle))?;

    let mut stack: Vec<CycleHandle, CYCLE_POOL_CAPACITY> = Vec::new();
    stack.push(root).map_err(|_| BuildError::UnbalancedSpec)?;
    let mut step_count = 0_usize;

    for item in spec {
        let parent = *stack.last().ok_or(BuildError::UnbalancedSpec)?;
        match item {
            SpecItem::Step(step) => {
                let handle = pools
                    .steps
                    .allocate(Step {
                        name: step.name.clone(),
                        target_temp: step.target_temp,
                        ramp_duration: step.ramp_duration,
                        hold_duration: step.hold_duration,
                        is_final: false,
                    })
                    .map_err(|PoolExhausted| BuildError::PoolExhausted(PoolKind::Step))?;
                pools
                    .cycles
                    .get_mut(parent)?
                    .add_component(ComponentHandle::Step(handle))?;
                step_count += 1;
            }
            SpecItem::BeginCycle(repeat_count) => {
                if *repeat_count == 0 {
                    return Err(BuildError::ZeroRepeatCount);
                }
                let handle = pools
                    .cycles
                    .allocate(Cycle::new(*repeat_count))
                    .map_err(|PoolExhausted| BuildError::PoolExhausted(PoolKind::Cycle))?;
                pools
                    .cycles
                    .get_mut(parent)?
                    .add_component(ComponentHandle::Cycle(handle))?;
                // The stack capacity matches the cycle pool, so this push
                // cannot fail after the allocation above succeeded.
                stack
                    .push(handle)
                    .map_err(|_| BuildError::PoolExhausted(PoolKind::Cycle))?;
            }
            SpecItem::EndCycle => {
                if stack.len() <= 1 {
                    return Err(BuildError::UnbalancedSpec);
                }
                stack.pop();
            }
        }
    }

    if stack.len() != 1 {
        return Err(BuildError::UnbalancedSpec);
    }
    if step_count == 0 {
        return Err(BuildError::EmptyProgram);
    }

    let final_step = pools
        .steps
        .allocate(Step::final_marker())
        .map_err(|PoolExhausted| BuildError::PoolExhausted(PoolKind::Step))?;

    let display_cycle = select_display_cycle(pools, root)?;

    Ok(Program {
        root,
        display_cycle,
        final_step,
        final_emitted: false,
    })
}

/// Picks the immediate child cycle with the largest repeat count, falling
/// back to the root for flat programs.
fn select_display_cycle(
    pools: &ProgramPools,
    root: CycleHandle,
) -> Result<CycleHandle, StaleHandle> {
    let mut best = root;
    let mut best_count = 0_u16;
    let components = &pools.cycles.get(root)?.components;
    for component in components {
        if let ComponentHandle::Cycle(child) = component {
            let count = pools.cycles.get(*child)?.repeat_count;
            if count > best_count {
                best_count = count;
                best = *child;
            }
        }
    }
    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_spec(name: &str, temp: f32, hold_s: u64) -> SpecItem {
        SpecItem::Step(
            StepSpec::new(name, temp, Duration::ZERO, Duration::from_secs(hold_s))
                .expect("valid step spec"),
        )
    }

    type Drained = Vec<(StepName, bool), 64>;

    fn drain_names(pools: &mut ProgramPools, program: &mut Program) -> Drained {
        let mut names = Drained::new();
        while let Some(handle) = program.next_step(pools).expect("valid traversal") {
            let step = pools.steps().get(handle).expect("live handle");
            names
                .push((bounded_name(step.name()).expect("bounded"), step.is_final()))
                .expect("drain buffer large enough");
        }
        names
    }

    #[test]
    fn pool_exhausts_on_capacity_plus_one() {
        let mut pool: ComponentPool<u32, 4> = ComponentPool::new();
        for value in 0..4 {
            assert!(pool.allocate(value).is_ok());
        }
        assert_eq!(pool.allocate(4), Err(PoolExhausted));
    }

    #[test]
    fn reset_invalidates_outstanding_handles() {
        let mut pool: ComponentPool<u32, 4> = ComponentPool::new();
        let handle = pool.allocate(7).expect("slot available");
        assert_eq!(pool.get(handle), Ok(&7));

        pool.reset();
        assert_eq!(pool.get(handle), Err(StaleHandle));

        let fresh = pool.allocate(9).expect("slot available");
        assert_eq!(pool.get(fresh), Ok(&9));
        assert_eq!(pool.get(handle), Err(StaleHandle));
    }

    #[test]
    fn flat_program_yields_steps_then_final_once() {
        let mut pools = ProgramPools::new();
        let mut spec = ProgramSpec::new();
        spec.push(step_spec("Denature", 95.0, 30)).unwrap();
        spec.push(step_spec("Anneal", 55.0, 30)).unwrap();

        let mut program = build_program(&mut pools, &spec).expect("valid program");
        program.begin_iteration(&mut pools).expect("live root");

        let names = drain_names(&mut pools, &mut program);
        assert_eq!(names.len(), 3);
        assert_eq!(names[0].0.as_str(), "Denature");
        assert_eq!(names[1].0.as_str(), "Anneal");
        assert!(names[2].1, "last yield must be the final sentinel");
        assert!(!names[0].1);
        assert!(!names[1].1);

        assert!(
            program.next_step(&mut pools).expect("valid traversal").is_none(),
            "sentinel is reachable exactly once per traversal"
        );
    }

    #[test]
    fn nested_cycle_repeats_flatten_in_order() {
        let mut pools = ProgramPools::new();
        let mut spec = ProgramSpec::new();
        spec.push(step_spec("Init", 95.0, 120)).unwrap();
        spec.push(SpecItem::BeginCycle(3)).unwrap();
        spec.push(step_spec("Denature", 95.0, 15)).unwrap();
        spec.push(step_spec("Extend", 72.0, 45)).unwrap();
        spec.push(SpecItem::EndCycle).unwrap();
        spec.push(step_spec("Final", 72.0, 300)).unwrap();

        let mut program = build_program(&mut pools, &spec).expect("valid program");
        program.begin_iteration(&mut pools).expect("live root");

        let names = drain_names(&mut pools, &mut program);
        let flattened: Vec<&str, 16> =
            names.iter().filter(|(_, f)| !f).map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            flattened.as_slice(),
            &[
                "Init", "Denature", "Extend", "Denature", "Extend", "Denature", "Extend", "Final"
            ][..]
        );
    }

    #[test]
    fn iteration_is_restartable() {
        let mut pools = ProgramPools::new();
        let mut spec = ProgramSpec::new();
        spec.push(SpecItem::BeginCycle(2)).unwrap();
        spec.push(step_spec("Denature", 94.0, 20)).unwrap();
        spec.push(step_spec("Anneal", 54.0, 20)).unwrap();
        spec.push(SpecItem::EndCycle).unwrap();

        let mut program = build_program(&mut pools, &spec).expect("valid program");

        program.begin_iteration(&mut pools).expect("live root");
        let first = drain_names(&mut pools, &mut program);
        program.begin_iteration(&mut pools).expect("live root");
        let second = drain_names(&mut pools, &mut program);
        assert_eq!(first, second);
    }

    #[test]
    fn repeat_count_times_step_count_before_final() {
        let mut pools = ProgramPools::new();
        let mut spec = ProgramSpec::new();
        spec.push(SpecItem::BeginCycle(5)).unwrap();
        spec.push(step_spec("A", 95.0, 1)).unwrap();
        spec.push(step_spec("B", 55.0, 1)).unwrap();
        spec.push(step_spec("C", 72.0, 1)).unwrap();
        spec.push(SpecItem::EndCycle).unwrap();

        let mut program = build_program(&mut pools, &spec).expect("valid program");
        program.begin_iteration(&mut pools).expect("live root");

        let names = drain_names(&mut pools, &mut program);
        assert_eq!(names.iter().filter(|(_, f)| !f).count(), 15);
        assert_eq!(names.iter().filter(|(_, f)| *f).count(), 1);
    }

    #[test]
    fn build_rejects_unbalanced_and_empty_definitions() {
        let mut pools = ProgramPools::new();

        let mut dangling = ProgramSpec::new();
        dangling.push(SpecItem::BeginCycle(2)).unwrap();
        dangling.push(step_spec("A", 95.0, 1)).unwrap();
        assert_eq!(
            build_program(&mut pools, &dangling),
            Err(BuildError::UnbalancedSpec)
        );
        pools.reset();

        let mut stray_end = ProgramSpec::new();
        stray_end.push(SpecItem::EndCycle).unwrap();
        assert_eq!(
            build_program(&mut pools, &stray_end),
            Err(BuildError::UnbalancedSpec)
        );
        pools.reset();

        let empty = ProgramSpec::new();
        assert_eq!(
            build_program(&mut pools, &empty),
            Err(BuildError::EmptyProgram)
        );
        pools.reset();

        let mut zero = ProgramSpec::new();
        zero.push(SpecItem::BeginCycle(0)).unwrap();
        zero.push(step_spec("A", 95.0, 1)).unwrap();
        zero.push(SpecItem::EndCycle).unwrap();
        assert_eq!(
            build_program(&mut pools, &zero),
            Err(BuildError::ZeroRepeatCount)
        );
    }

    #[test]
    fn display_cycle_prefers_largest_child_repeat() {
        let mut pools = ProgramPools::new();
        let mut spec = ProgramSpec::new();
        spec.push(step_spec("Init", 95.0, 120)).unwrap();
        spec.push(SpecItem::BeginCycle(10)).unwrap();
        spec.push(step_spec("Touchdown", 62.0, 20)).unwrap();
        spec.push(SpecItem::EndCycle).unwrap();
        spec.push(SpecItem::BeginCycle(35)).unwrap();
        spec.push(step_spec("Denature", 94.0, 20)).unwrap();
        spec.push(SpecItem::EndCycle).unwrap();

        let program = build_program(&mut pools, &spec).expect("valid program");
        let display = pools.cycles().get(program.display_cycle()).expect("live");
        assert_eq!(display.repeat_count(), 35);

        pools.reset();
        let mut flat = ProgramSpec::new();
        flat.push(step_spec("Soak", 37.0, 600)).unwrap();
        let program = build_program(&mut pools, &flat).expect("valid program");
        assert_eq!(program.display_cycle(), program.root());
    }
}
