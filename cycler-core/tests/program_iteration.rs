use core::time::Duration;

use cycler_core::program::{
    BuildError, ComponentPool, PoolExhausted, PoolKind, ProgramPools, ProgramSpec, SpecItem,
    StaleHandle, StepSpec, build_program, STEP_POOL_CAPACITY,
};

fn step(name: &str, temp: f32, hold_s: u64) -> SpecItem {
    SpecItem::Step(
        StepSpec::new(name, temp, Duration::ZERO, Duration::from_secs(hold_s))
            .expect("valid step spec"),
    )
}

fn drain(pools: &mut ProgramPools, program: &mut cycler_core::program::Program) -> Vec<String> {
    let mut sequence = Vec::new();
    while let Some(handle) = program.next_step(pools).expect("valid traversal") {
        let found = pools.steps().get(handle).expect("live handle");
        if found.is_final() {
            sequence.push("<final>".to_string());
        } else {
            sequence.push(found.name().to_string());
        }
    }
    sequence
}

#[test]
fn repeated_drains_yield_identical_sequences() {
    let mut pools = ProgramPools::new();
    let mut spec = ProgramSpec::new();
    spec.push(step("Init", 95.0, 120)).unwrap();
    spec.push(SpecItem::BeginCycle(4)).unwrap();
    spec.push(step("Denature", 94.0, 15)).unwrap();
    spec.push(SpecItem::BeginCycle(2)).unwrap();
    spec.push(step("Anneal", 55.0, 20)).unwrap();
    spec.push(SpecItem::EndCycle).unwrap();
    spec.push(step("Extend", 72.0, 45)).unwrap();
    spec.push(SpecItem::EndCycle).unwrap();

    let mut program = build_program(&mut pools, &spec).expect("valid program");

    program.begin_iteration(&mut pools).expect("live root");
    let first = drain(&mut pools, &mut program);
    program.begin_iteration(&mut pools).expect("live root");
    let second = drain(&mut pools, &mut program);
    program.begin_iteration(&mut pools).expect("live root");
    let third = drain(&mut pools, &mut program);

    assert_eq!(first, second);
    assert_eq!(second, third);

    // Init + 4 * (Denature + 2 * Anneal + Extend) + final marker.
    assert_eq!(first.len(), 1 + 4 * 4 + 1);
    assert_eq!(first.last().map(String::as_str), Some("<final>"));
}

#[test]
fn repeat_count_times_step_count_calls_before_final() {
    let mut pools = ProgramPools::new();
    let mut spec = ProgramSpec::new();
    spec.push(SpecItem::BeginCycle(7)).unwrap();
    spec.push(step("Denature", 94.0, 15)).unwrap();
    spec.push(step("Anneal", 58.0, 20)).unwrap();
    spec.push(SpecItem::EndCycle).unwrap();

    let mut program = build_program(&mut pools, &spec).expect("valid program");
    program.begin_iteration(&mut pools).expect("live root");

    let mut non_final = 0;
    loop {
        let handle = program
            .next_step(&mut pools)
            .expect("valid traversal")
            .expect("sentinel terminates the walk");
        if pools.steps().get(handle).expect("live handle").is_final() {
            break;
        }
        non_final += 1;
    }
    assert_eq!(non_final, 7 * 2);
    assert!(program.next_step(&mut pools).expect("valid traversal").is_none());
}

#[test]
fn pool_rejects_allocation_past_capacity() {
    let mut pool: ComponentPool<u8, 20> = ComponentPool::new();
    for value in 0..20 {
        assert!(pool.allocate(value).is_ok(), "slot {value} must allocate");
    }
    assert_eq!(pool.allocate(20), Err(PoolExhausted));
}

#[test]
fn oversized_program_is_rejected_whole() {
    let mut pools = ProgramPools::new();
    let mut spec = ProgramSpec::new();
    // The step pool also hosts the final sentinel, so a definition using
    // every slot leaves no room and is rejected outright.
    for index in 0..STEP_POOL_CAPACITY {
        spec.push(step("Hold", 50.0, index as u64 + 1)).unwrap();
    }

    assert_eq!(
        build_program(&mut pools, &spec),
        Err(BuildError::PoolExhausted(PoolKind::Step))
    );
    pools.reset();

    let mut fits = ProgramSpec::new();
    for index in 0..STEP_POOL_CAPACITY - 1 {
        fits.push(step("Hold", 50.0, index as u64 + 1)).unwrap();
    }
    assert!(build_program(&mut pools, &fits).is_ok());
}

#[test]
fn pool_reset_invalidates_program_handles() {
    let mut pools = ProgramPools::new();
    let mut spec = ProgramSpec::new();
    spec.push(step("Denature", 95.0, 30)).unwrap();

    let mut program = build_program(&mut pools, &spec).expect("valid program");
    program.begin_iteration(&mut pools).expect("live root");
    let handle = program
        .next_step(&mut pools)
        .expect("valid traversal")
        .expect("one step");
    assert!(pools.steps().get(handle).is_ok());

    pools.reset();
    assert_eq!(pools.steps().get(handle), Err(StaleHandle));
    assert_eq!(program.begin_iteration(&mut pools), Err(StaleHandle));
}
