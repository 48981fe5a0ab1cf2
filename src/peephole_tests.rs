use std::num::Wrapping;

use pretty_assertions::assert_eq;
use quickcheck::{quickcheck, Arbitrary, Gen, TestResult};

use crate::bfir::parse;
use crate::bfir::Instruction;
use crate::bfir::Instruction::*;
use crate::peephole::*;

// Loops nest at most this deep, which keeps generated programs small
// enough to run to completion.
const MAX_LOOP_DEPTH: usize = 2;

fn arbitrary_instr<G: Gen>(g: &mut G, depth: usize) -> Instruction {
    match g.next_u32() % 8 {
        0 | 1 => Increment(Wrapping(Arbitrary::arbitrary(g))),
        // Small pointer moves, so we stay on the tape most of the time.
        2 | 3 => PointerIncrement((g.next_u32() % 7) as isize - 3),
        4 => Set(Wrapping(Arbitrary::arbitrary(g))),
        5 => Read,
        6 => Write,
        _ if depth < MAX_LOOP_DEPTH => {
            let len = g.next_u32() % 4;
            Loop((0..len).map(|_| arbitrary_instr(g, depth + 1)).collect())
        }
        _ => Loop(vec![Increment(Wrapping(-1))]),
    }
}

impl Arbitrary for Instruction {
    fn arbitrary<G: Gen>(g: &mut G) -> Instruction {
        arbitrary_instr(g, 0)
    }
}

#[test]
fn combine_increments_flat() {
    let initial = vec![Increment(Wrapping(1)), Increment(Wrapping(2))];
    assert_eq!(combine_increments(initial), [Increment(Wrapping(3))]);
}

#[test]
fn combine_increments_unrelated() {
    let initial = vec![Increment(Wrapping(1)), PointerIncrement(1)];
    assert_eq!(combine_increments(initial.clone()), initial);
}

#[test]
fn combine_increments_removes_zero() {
    let initial = vec![
        Increment(Wrapping(1)),
        Increment(Wrapping(-1)),
        PointerIncrement(1),
    ];
    assert_eq!(combine_increments(initial), [PointerIncrement(1)]);
}

#[test]
fn combine_increments_runs_of_three() {
    let initial = parse("+-+").unwrap();
    assert_eq!(combine_increments(initial), [Increment(Wrapping(1))]);
}

#[test]
fn combine_increments_wraps() {
    let initial = vec![Increment(Wrapping(1)); 256];
    assert!(combine_increments(initial).is_empty());

    let initial = vec![Increment(Wrapping(127)), Increment(Wrapping(1))];
    assert_eq!(combine_increments(initial), [Increment(Wrapping(-128))]);
}

#[test]
fn combine_increments_single_scan() {
    // The increments cancel, but the pointer moves they separated are
    // not revisited.
    let initial = parse(">+-<").unwrap();
    assert_eq!(
        combine_increments(initial),
        [PointerIncrement(1), PointerIncrement(-1)]
    );
}

#[test]
fn combine_increments_top_level_only() {
    let initial = vec![Loop(vec![Increment(Wrapping(1)), Increment(Wrapping(1))])];
    assert_eq!(combine_increments(initial.clone()), initial);
}

#[test]
fn should_combine_ptr_increments() {
    let initial = vec![PointerIncrement(1), PointerIncrement(1)];
    assert_eq!(combine_ptr_increments(initial), [PointerIncrement(2)]);
}

#[test]
fn combine_ptr_increments_removes_zero() {
    let initial = parse("><+").unwrap();
    assert_eq!(combine_ptr_increments(initial), [Increment(Wrapping(1))]);
}

#[test]
fn combine_ptr_increments_top_level_only() {
    let initial = parse("[>>]").unwrap();
    assert_eq!(combine_ptr_increments(initial.clone()), initial);
}

#[test]
fn annotate_known_zero_at_start() {
    let initial = parse("+").unwrap();
    assert_eq!(
        annotate_known_zero(initial),
        [Set(Wrapping(0)), Increment(Wrapping(1))]
    );
}

#[test]
fn annotate_known_zero_empty_program() {
    assert_eq!(annotate_known_zero(vec![]), [Set(Wrapping(0))]);
}

#[test]
fn combine_sets_keeps_last() {
    let initial = vec![Set(Wrapping(1)), Set(Wrapping(2)), Set(Wrapping(3))];
    assert_eq!(combine_sets(initial), [Set(Wrapping(3))]);
}

#[test]
fn combine_sets_separated() {
    let initial = vec![Set(Wrapping(1)), Write, Set(Wrapping(2))];
    assert_eq!(combine_sets(initial.clone()), initial);
}

#[test]
fn zeroing_loops_decrement() {
    let initial = parse("[-]").unwrap();
    assert_eq!(zeroing_loops(initial), [Set(Wrapping(0))]);
}

#[test]
fn zeroing_loops_only_single_decrement() {
    let initial = vec![
        Loop(vec![Increment(Wrapping(1))]),
        Loop(vec![Increment(Wrapping(-2))]),
        Loop(vec![Increment(Wrapping(-1)), Write]),
        Loop(vec![]),
    ];
    assert_eq!(zeroing_loops(initial.clone()), initial);
}

#[test]
fn zeroing_loops_top_level_only() {
    let initial = parse("[>[-]]").unwrap();
    assert_eq!(zeroing_loops(initial.clone()), initial);
}

#[test]
fn combine_set_and_increment() {
    let initial = vec![Set(Wrapping(2)), Increment(Wrapping(3))];
    assert_eq!(combine_set_and_increments(initial), [Set(Wrapping(5))]);
}

#[test]
fn combine_set_and_increment_wraps() {
    let initial = vec![Set(Wrapping(-1)), Increment(Wrapping(1))];
    assert_eq!(combine_set_and_increments(initial), [Set(Wrapping(0))]);
}

#[test]
fn combine_set_and_increment_folds_a_run() {
    let initial = vec![
        Set(Wrapping(0)),
        Increment(Wrapping(1)),
        Increment(Wrapping(1)),
    ];
    assert_eq!(combine_set_and_increments(initial), [Set(Wrapping(2))]);
}

#[test]
fn combine_increment_and_set_is_untouched() {
    let initial = vec![Increment(Wrapping(1)), Set(Wrapping(2))];
    assert_eq!(combine_set_and_increments(initial.clone()), initial);
}

#[test]
fn remove_dead_loops_after_zero() {
    let initial = vec![Set(Wrapping(0)), Loop(vec![Write]), Loop(vec![Read])];
    assert_eq!(remove_dead_loops(initial), [Set(Wrapping(0))]);
}

#[test]
fn remove_dead_loops_keeps_live_loops() {
    let initial = vec![Set(Wrapping(1)), Loop(vec![Write])];
    assert_eq!(remove_dead_loops(initial.clone()), initial);
}

#[test]
fn pipeline_increment() {
    assert_eq!(optimize(parse("+").unwrap()), [Set(Wrapping(1))]);
}

#[test]
fn pipeline_zeroing_loop() {
    // combine_sets runs before the loop becomes a set, so both sets
    // survive.
    assert_eq!(
        optimize(parse("[-]").unwrap()),
        [Set(Wrapping(0)), Set(Wrapping(0))]
    );
}

#[test]
fn pipeline_empty_program() {
    assert_eq!(optimize(vec![]), [Set(Wrapping(0))]);
}

#[test]
fn pipeline_leaves_loop_bodies() {
    let instrs = optimize(parse(">>[++[-]]").unwrap());
    assert_eq!(
        instrs,
        [
            Set(Wrapping(0)),
            PointerIncrement(2),
            Loop(vec![
                Increment(Wrapping(1)),
                Increment(Wrapping(1)),
                Loop(vec![Increment(Wrapping(-1))]),
            ]),
        ]
    );
}

#[test]
fn optimize_with_no_passes() {
    let instrs = parse("++>").unwrap();
    assert_eq!(
        optimize_with(instrs.clone(), OptimisationsFlags::empty()),
        instrs
    );
}

#[test]
fn optimize_with_selected_pass() {
    let instrs = parse("++>>").unwrap();
    assert_eq!(
        optimize_with(instrs, OptimisationsFlags::COMBINE_PTR_INCREMENTS),
        [
            Increment(Wrapping(1)),
            Increment(Wrapping(1)),
            PointerIncrement(2)
        ]
    );
}

#[test]
fn optimize_with_dead_loops() {
    let flags = OptimisationsFlags::PIPELINE | OptimisationsFlags::REMOVE_DEAD_LOOPS;
    assert_eq!(optimize_with(parse("[.]").unwrap(), flags), [Set(Wrapping(0))]);
}

#[test]
fn default_flags_are_pipeline() {
    assert_eq!(OptimisationsFlags::default(), OptimisationsFlags::PIPELINE);
    assert!(!OptimisationsFlags::PIPELINE.contains(OptimisationsFlags::REMOVE_DEAD_LOOPS));
}

#[test]
fn passes_preserve_loop_count() {
    fn count_loops(instrs: &[Instruction]) -> usize {
        instrs.iter().filter(|instr| matches!(instr, Loop(_))).count()
    }

    fn is_preserved(instrs: Vec<Instruction>) -> TestResult {
        let before = count_loops(&instrs);
        let result = combine_set_and_increments(combine_sets(combine_ptr_increments(
            combine_increments(instrs),
        )));
        TestResult::from_bool(count_loops(&result) == before)
    }
    quickcheck(is_preserved as fn(Vec<Instruction>) -> TestResult)
}

#[test]
fn combine_increments_is_idempotent() {
    fn is_idempotent(instrs: Vec<Instruction>) -> bool {
        let once = combine_increments(instrs);
        combine_increments(once.clone()) == once
    }
    quickcheck(is_idempotent as fn(Vec<Instruction>) -> bool)
}

#[test]
fn pipeline_starts_with_set() {
    fn starts_with_set(instrs: Vec<Instruction>) -> bool {
        matches!(optimize(instrs).first(), Some(Set(_)))
    }
    quickcheck(starts_with_set as fn(Vec<Instruction>) -> bool)
}
