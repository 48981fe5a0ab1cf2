use quickcheck::{quickcheck, Arbitrary, Gen, TestResult};

use crate::bfir::{parse, Instruction, Program};
use crate::execution::Outcome::*;
use crate::execution::{execute, execute_cfg, interpret_source};
use crate::lowering::lower;
use crate::peephole::*;

const MAX_STEPS: u64 = 1000;

/// The input every randomised program reads from. Programs that read
/// more than this see EOF.
const INPUT: &[u8] = &[3, 0, 255, 7];

fn transform_is_sound<F>(instrs: Program, transform: F) -> TestResult
where
    F: Fn(Program) -> Program,
{
    // First, we execute the program given.
    let (state, result) = execute(&instrs, INPUT, MAX_STEPS);

    // Optimisations may change malformed programs to well-formed
    // programs, so we ignore programs that don't terminate nicely.
    match result {
        RuntimeError { .. } | OutOfSteps => return TestResult::discard(),
        Completed(_) => (),
    }

    // Next, we execute the program after transformation. Some passes
    // add an instruction, so give it a little slack.
    let optimised_instrs = transform(instrs);
    let (state2, result2) = execute(&optimised_instrs, INPUT, MAX_STEPS + 16);

    // We allow them to take a different amount of steps.
    if !matches!(result2, Completed(_)) {
        println!("Optimised program did not terminate properly: {:?}", result2);
        return TestResult::failed();
    }

    if state.outputs != state2.outputs {
        println!(
            "Different outputs! Original outputs: {:?} Optimised: {:?}",
            state.outputs, state2.outputs
        );
        return TestResult::failed();
    }

    if state.cells != state2.cells || state.cell_ptr != state2.cell_ptr {
        println!("Different cell states!");
        return TestResult::failed();
    }

    TestResult::passed()
}

#[test]
fn combine_increments_is_sound() {
    fn is_sound(instrs: Program) -> TestResult {
        transform_is_sound(instrs, combine_increments)
    }
    quickcheck(is_sound as fn(Program) -> TestResult)
}

#[test]
fn combine_ptr_increments_is_sound() {
    fn is_sound(instrs: Program) -> TestResult {
        transform_is_sound(instrs, combine_ptr_increments)
    }
    quickcheck(is_sound as fn(Program) -> TestResult)
}

#[test]
fn annotate_known_zero_is_sound() {
    fn is_sound(instrs: Program) -> TestResult {
        transform_is_sound(instrs, annotate_known_zero)
    }
    quickcheck(is_sound as fn(Program) -> TestResult)
}

#[test]
fn combine_sets_is_sound() {
    fn is_sound(instrs: Program) -> TestResult {
        transform_is_sound(instrs, combine_sets)
    }
    quickcheck(is_sound as fn(Program) -> TestResult)
}

#[test]
fn zeroing_loops_is_sound() {
    fn is_sound(instrs: Program) -> TestResult {
        transform_is_sound(instrs, zeroing_loops)
    }
    quickcheck(is_sound as fn(Program) -> TestResult)
}

#[test]
fn combine_set_and_increments_is_sound() {
    fn is_sound(instrs: Program) -> TestResult {
        transform_is_sound(instrs, combine_set_and_increments)
    }
    quickcheck(is_sound as fn(Program) -> TestResult)
}

#[test]
fn remove_dead_loops_is_sound() {
    fn is_sound(instrs: Program) -> TestResult {
        transform_is_sound(instrs, remove_dead_loops)
    }
    quickcheck(is_sound as fn(Program) -> TestResult)
}

#[test]
fn optimize_is_sound() {
    fn is_sound(instrs: Program) -> TestResult {
        transform_is_sound(instrs, optimize)
    }
    quickcheck(is_sound as fn(Program) -> TestResult)
}

/// Run `instrs` directly and after lowering, and check they agree.
fn lowering_preserves_behaviour(instrs: &[Instruction]) -> Result<(), String> {
    let (state, result) = execute(instrs, INPUT, MAX_STEPS);

    let cfg = lower(instrs).map_err(|e| e.to_string())?;
    // The lowered program costs a step per block entered, which is at
    // most two per interpreter step plus the entry block.
    let (cfg_state, cfg_result) =
        execute_cfg(&cfg, INPUT, 2 * MAX_STEPS + 1).map_err(|e| e.to_string())?;

    match (result, cfg_result) {
        // Programs that don't finish can't be compared.
        (OutOfSteps, _) => return Ok(()),
        (Completed(_), Completed(_)) => (),
        (RuntimeError { cell_ptr }, RuntimeError { cell_ptr: cfg_cell_ptr })
            if cell_ptr == cfg_cell_ptr => {}
        (result, cfg_result) => {
            return Err(format!(
                "Different outcomes! Interpreted: {:?} Lowered: {:?}",
                result, cfg_result
            ))
        }
    }

    if state != cfg_state {
        return Err(format!(
            "Different states! Interpreted outputs: {:?} Lowered outputs: {:?}",
            state.outputs, cfg_state.outputs
        ));
    }

    Ok(())
}

#[test]
fn lowering_preserves_output_at_every_stage() {
    fn is_sound(instrs: Program) -> TestResult {
        // Programs that don't finish can't be compared.
        if execute(&instrs, INPUT, MAX_STEPS).1 == OutOfSteps {
            return TestResult::discard();
        }

        let mut stage = instrs;
        if let Err(message) = lowering_preserves_behaviour(&stage) {
            println!("Before optimisation: {}", message);
            return TestResult::failed();
        }

        for (flag, name, pass) in PASSES.iter() {
            if !OptimisationsFlags::PIPELINE.contains(*flag) {
                continue;
            }

            stage = pass(stage);
            if let Err(message) = lowering_preserves_behaviour(&stage) {
                println!("After {}: {}", name, message);
                return TestResult::failed();
            }
        }

        TestResult::passed()
    }
    quickcheck(is_sound as fn(Program) -> TestResult)
}

#[test]
fn lowering_known_programs() {
    let sources = [
        "++++++++[>++++++++<-]>+.+.",
        ",[.,]",
        ",+[-.,+]",
        ">>+[<]<+.",
        "[-]-.",
    ];

    for source in sources.iter() {
        let instrs = parse(source).unwrap();
        assert_eq!(lowering_preserves_behaviour(&instrs), Ok(()), "{}", source);
        assert_eq!(
            lowering_preserves_behaviour(&optimize(instrs)),
            Ok(()),
            "{}",
            source
        );
    }
}

/// BF source whose brackets are balanced, with the occasional
/// comment character.
#[derive(Debug, Clone)]
struct Source(String);

impl Arbitrary for Source {
    fn arbitrary<G: Gen>(g: &mut G) -> Source {
        let len = g.size();
        let mut source = String::with_capacity(len);
        let mut depth = 0;

        for _ in 0..len {
            let c = match g.next_u32() % 10 {
                0 => '+',
                1 => '-',
                2 => '>',
                3 => '<',
                4 => ',',
                5 => '.',
                6 => '[',
                7 if depth > 0 => ']',
                8 => '+',
                _ => 'x',
            };

            match c {
                '[' => depth += 1,
                ']' => depth -= 1,
                _ => (),
            }
            source.push(c);
        }

        for _ in 0..depth {
            source.push(']');
        }

        Source(source)
    }
}

#[test]
fn interpreting_source_matches_ir() {
    fn is_same(source: Source) -> bool {
        let Source(source) = source;
        let instrs = match parse(&source) {
            Ok(instrs) => instrs,
            Err(_) => return false,
        };

        let from_ir = execute(&instrs, INPUT, MAX_STEPS);
        let from_source = interpret_source(&source, INPUT, MAX_STEPS);

        from_source == Ok(from_ir)
    }
    quickcheck(is_same as fn(Source) -> bool)
}
