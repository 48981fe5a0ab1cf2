//! Reference executors for BF programs.
//!
//! We can run a program in three forms: as source text, as IR and as
//! a lowered control flow graph. All three share the same rules:
//!
//! * the tape has `NUM_CELLS` cells, all initially zero,
//! * moving the cell pointer always succeeds, but reading or writing
//!   a cell outside the tape is a runtime error,
//! * reading past the end of the input yields 0xFF (-1, C's EOF
//!   truncated to a cell),
//! * every executed instruction, and every loop test, costs a step.
//!
//! They exist so tests can check that optimising and lowering a
//! program does not change what it prints.

use std::collections::HashMap;
use std::num::Wrapping;

use tracing::trace;

use crate::bfir::Instruction::*;
use crate::bfir::{match_close, match_open, BracketTable, Cell, Instruction, ParseError, NUM_CELLS};
use crate::cfg::{CfgError, ControlFlowGraph, Op, Reg, Terminator};
use crate::lowering::Primitive;

#[cfg(test)]
use crate::bfir::parse;
#[cfg(test)]
use pretty_assertions::assert_eq;

/// The value a read produces once the input is exhausted.
const EOF: u8 = 0xFF;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionState {
    pub cells: Vec<Cell>,
    pub cell_ptr: isize,
    pub outputs: Vec<u8>,
    /// How many input bytes have been consumed.
    pub input_ptr: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Return the number of steps remaining at completion.
    Completed(u64),
    /// A cell outside the tape was accessed.
    RuntimeError { cell_ptr: isize },
    OutOfSteps,
}

impl ExecutionState {
    pub fn initial(num_cells: usize) -> Self {
        ExecutionState {
            cells: vec![Wrapping(0); num_cells],
            cell_ptr: 0,
            outputs: vec![],
            input_ptr: 0,
        }
    }

    fn cell_index(&self, cell_ptr: isize) -> Result<usize, Outcome> {
        if cell_ptr >= 0 && (cell_ptr as usize) < self.cells.len() {
            Ok(cell_ptr as usize)
        } else {
            Err(Outcome::RuntimeError { cell_ptr })
        }
    }

    fn cell(&self) -> Result<Cell, Outcome> {
        let index = self.cell_index(self.cell_ptr)?;
        Ok(self.cells[index])
    }

    fn cell_mut(&mut self) -> Result<&mut Cell, Outcome> {
        let index = self.cell_index(self.cell_ptr)?;
        Ok(&mut self.cells[index])
    }

    fn read_byte(&mut self, input: &[u8]) -> u8 {
        match input.get(self.input_ptr) {
            Some(&byte) => {
                self.input_ptr += 1;
                byte
            }
            None => EOF,
        }
    }
}

fn take_step(steps_left: u64) -> Result<u64, Outcome> {
    steps_left.checked_sub(1).ok_or(Outcome::OutOfSteps)
}

/// Run `instrs` on a fresh tape for at most `steps` steps.
pub fn execute(instrs: &[Instruction], input: &[u8], steps: u64) -> (ExecutionState, Outcome) {
    let mut state = ExecutionState::initial(NUM_CELLS);
    let outcome = execute_with_state(instrs, &mut state, input, steps);
    (state, outcome)
}

/// Run `instrs` starting from `state`. `input` is read from
/// `state.input_ptr` onwards.
pub fn execute_with_state(
    instrs: &[Instruction],
    state: &mut ExecutionState,
    input: &[u8],
    steps: u64,
) -> Outcome {
    match execute_inner(instrs, state, input, steps) {
        Ok(steps_left) => Outcome::Completed(steps_left),
        Err(outcome) => outcome,
    }
}

fn execute_inner(
    instrs: &[Instruction],
    state: &mut ExecutionState,
    input: &[u8],
    steps: u64,
) -> Result<u64, Outcome> {
    let mut steps_left = steps;

    for instr in instrs {
        steps_left = take_step(steps_left)?;

        match instr {
            Increment(amount) => *state.cell_mut()? += *amount,
            PointerIncrement(amount) => state.cell_ptr = state.cell_ptr.wrapping_add(*amount),
            Set(amount) => *state.cell_mut()? = *amount,
            Read => {
                let byte = state.read_byte(input);
                *state.cell_mut()? = Wrapping(byte as i8);
            }
            Write => {
                let cell_value = state.cell()?;
                state.outputs.push(cell_value.0 as u8);
            }
            Loop(body) => {
                while state.cell()?.0 != 0 {
                    steps_left = execute_inner(body, state, input, steps_left)?;
                    // Testing the cell again costs a step.
                    steps_left = take_step(steps_left)?;
                }
            }
        }
    }

    Ok(steps_left)
}

/// Run BF source text directly, finding matching brackets by scanning
/// the source each time a jump is taken.
pub fn interpret_source(
    source: &str,
    input: &[u8],
    steps: u64,
) -> Result<(ExecutionState, Outcome), ParseError> {
    let bytes = source.as_bytes();
    BracketTable::build(bytes)?;

    let mut state = ExecutionState::initial(NUM_CELLS);
    let outcome = match interpret_inner(bytes, &mut state, input, steps) {
        Ok(steps_left) => Outcome::Completed(steps_left),
        Err(outcome) => outcome,
    };

    Ok((state, outcome))
}

// The brackets of `source` must already be balanced.
fn interpret_inner(
    source: &[u8],
    state: &mut ExecutionState,
    input: &[u8],
    steps: u64,
) -> Result<u64, Outcome> {
    let mut steps_left = steps;
    let mut pc = 0;

    while pc < source.len() {
        let c = source[pc];
        if !b"+-<>,.[]".contains(&c) {
            pc += 1;
            continue;
        }

        steps_left = take_step(steps_left)?;

        match c {
            b'+' => *state.cell_mut()? += Wrapping(1),
            b'-' => *state.cell_mut()? -= Wrapping(1),
            b'>' => state.cell_ptr = state.cell_ptr.wrapping_add(1),
            b'<' => state.cell_ptr = state.cell_ptr.wrapping_sub(1),
            b',' => {
                let byte = state.read_byte(input);
                *state.cell_mut()? = Wrapping(byte as i8);
            }
            b'.' => {
                let cell_value = state.cell()?;
                state.outputs.push(cell_value.0 as u8);
            }
            b'[' => {
                if state.cell()?.0 == 0 {
                    pc = match_close(source, pc).unwrap_or(source.len());
                }
            }
            b']' => {
                if state.cell()?.0 != 0 {
                    pc = match_open(source, pc).unwrap_or(pc);
                }
            }
            _ => (),
        }

        pc += 1;
    }

    Ok(steps_left)
}

/// Run a lowered program. Cell values and the cell index live in
/// registers; the final state reports the tape and the index as they
/// were when the function returned.
pub fn execute_cfg(
    cfg: &ControlFlowGraph,
    input: &[u8],
    steps: u64,
) -> Result<(ExecutionState, Outcome), CfgError> {
    cfg.verify()?;

    let mut machine = CfgMachine {
        regs: vec![0; cfg.num_regs()],
        tapes: HashMap::new(),
        index_slots: vec![],
        state: ExecutionState::initial(0),
    };

    let outcome = match machine.run(cfg, input, steps)? {
        Ok(steps_left) => Outcome::Completed(steps_left),
        Err(outcome) => outcome,
    };

    let mut state = machine.state;
    // The first index slot is the one the program moves.
    state.cell_ptr = machine.index_slots.first().copied().unwrap_or(0) as isize;
    if let Some(cells) = machine.tapes.remove(&0) {
        state.cells = cells;
    }

    Ok((state, outcome))
}

struct CfgMachine {
    regs: Vec<i64>,
    // Tapes by handle. Freed tapes are kept so we can report them.
    tapes: HashMap<i64, Vec<Cell>>,
    index_slots: Vec<i64>,
    state: ExecutionState,
}

impl CfgMachine {
    fn get(&self, reg: Reg) -> i64 {
        self.regs[reg.0]
    }

    fn set(&mut self, reg: Reg, value: i64) {
        self.regs[reg.0] = value;
    }

    // Cell addresses are plain indexes into the (single) tape.
    fn tape_cell(&mut self, address: i64) -> Result<&mut Cell, Outcome> {
        let cell_ptr = address as isize;
        self.tapes
            .get_mut(&0)
            .and_then(|tape| {
                if address >= 0 {
                    tape.get_mut(address as usize)
                } else {
                    None
                }
            })
            .ok_or(Outcome::RuntimeError { cell_ptr })
    }

    fn run(
        &mut self,
        cfg: &ControlFlowGraph,
        input: &[u8],
        steps: u64,
    ) -> Result<Result<u64, Outcome>, CfgError> {
        let mut steps_left = steps;
        let mut block = match cfg.entry() {
            Some(block) => block,
            None => return Err(CfgError::Empty),
        };

        loop {
            trace!(block = %block.name, "entering block");

            for op in &block.ops {
                if let Err(outcome) = self.step(op, input) {
                    return Ok(Err(outcome));
                }
            }

            steps_left = match take_step(steps_left) {
                Ok(steps_left) => steps_left,
                Err(outcome) => return Ok(Err(outcome)),
            };

            let terminator = block
                .terminator
                .ok_or_else(|| CfgError::Unterminated(block.name.clone()))?;
            let target = match terminator {
                Terminator::Return(_) => return Ok(Ok(steps_left)),
                Terminator::Branch(target) => target,
                Terminator::CondBranch {
                    cond,
                    if_true,
                    if_false,
                } => {
                    if self.get(cond) != 0 {
                        if_true
                    } else {
                        if_false
                    }
                }
            };

            block = cfg.block(target).ok_or_else(|| CfgError::UnknownTarget {
                from: block.name.clone(),
                to: target,
            })?;
        }
    }

    fn step(&mut self, op: &Op, input: &[u8]) -> Result<(), Outcome> {
        match op {
            Op::AllocTape { dest, num_cells } => {
                let handle = self.tapes.len() as i64;
                self.tapes.insert(handle, vec![Wrapping(0); *num_cells]);
                self.set(*dest, handle);
            }
            Op::FreeTape { .. } => (),
            Op::AllocIndex { dest } => {
                self.index_slots.push(0);
                self.set(*dest, self.index_slots.len() as i64 - 1);
            }
            Op::IndexConst { dest, value } => self.set(*dest, *value as i64),
            Op::CellConst { dest, value } => self.set(*dest, i64::from(value.0 as u8)),
            Op::LoadIndex { dest, ptr } => {
                let value = self.index_slots[self.get(*ptr) as usize];
                self.set(*dest, value);
            }
            Op::StoreIndex { ptr, value } => {
                let slot = self.get(*ptr) as usize;
                self.index_slots[slot] = self.get(*value);
            }
            Op::AddIndex { dest, lhs, rhs } => {
                let sum = self.get(*lhs).wrapping_add(self.get(*rhs));
                self.set(*dest, sum);
            }
            Op::CellAddress { dest, index, .. } => self.set(*dest, self.get(*index)),
            Op::LoadCell { dest, address } => {
                let cell_value = *self.tape_cell(self.get(*address))?;
                self.set(*dest, i64::from(cell_value.0 as u8));
            }
            Op::StoreCell { address, value } => {
                let byte = self.get(*value) as u8;
                *self.tape_cell(self.get(*address))? = Wrapping(byte as i8);
            }
            Op::AddCell { dest, lhs, rhs } => {
                let sum = (self.get(*lhs) + self.get(*rhs)) & 0xFF;
                self.set(*dest, sum);
            }
            Op::IsZero { dest, value } => {
                let is_zero = self.get(*value) & 0xFF == 0;
                self.set(*dest, is_zero as i64);
            }
            Op::Call { dest, callee, args } => {
                let result = match callee {
                    Primitive::GetChar => i64::from(self.state.read_byte(input)),
                    Primitive::PutChar => {
                        let byte = args.first().map_or(0, |arg| self.get(*arg)) as u8;
                        self.state.outputs.push(byte);
                        i64::from(byte)
                    }
                };
                self.set(*dest, result);
            }
        }

        Ok(())
    }
}

#[test]
fn execute_increment() {
    let (state, outcome) = execute(&[Increment(Wrapping(1))], &[], 10);
    assert_eq!(state.cells[0], Wrapping(1));
    assert_eq!(outcome, Outcome::Completed(9));
}

#[test]
fn execute_increment_wraps() {
    let (state, _) = execute(&[Set(Wrapping(127)), Increment(Wrapping(1))], &[], 10);
    assert_eq!(state.cells[0], Wrapping(-128));
}

#[test]
fn execute_write() {
    let instrs = parse("++++++++[>++++++++<-]>+.").unwrap();
    let (state, outcome) = execute(&instrs, &[], 1000);
    assert_eq!(state.outputs, b"A");
    assert!(matches!(outcome, Outcome::Completed(_)));
}

#[test]
fn execute_read() {
    let (state, _) = execute(&[Read, Write, PointerIncrement(1), Read], b"x", 10);
    assert_eq!(state.outputs, b"x");
    assert_eq!(state.input_ptr, 1);
    // EOF.
    assert_eq!(state.cells[1], Wrapping(-1));
}

#[test]
fn execute_moving_off_the_tape_is_fine() {
    let instrs = [PointerIncrement(-1), PointerIncrement(1), Increment(Wrapping(1))];
    let (state, outcome) = execute(&instrs, &[], 10);
    assert_eq!(state.cells[0], Wrapping(1));
    assert!(matches!(outcome, Outcome::Completed(_)));
}

#[test]
fn execute_access_off_the_tape_is_an_error() {
    let (_, outcome) = execute(&[PointerIncrement(-1), Increment(Wrapping(1))], &[], 10);
    assert_eq!(outcome, Outcome::RuntimeError { cell_ptr: -1 });

    let (_, outcome) = execute(&[PointerIncrement(NUM_CELLS as isize), Write], &[], 10);
    assert_eq!(
        outcome,
        Outcome::RuntimeError {
            cell_ptr: NUM_CELLS as isize
        }
    );
}

#[test]
fn execute_infinite_loop_runs_out_of_steps() {
    let instrs = parse("+[]").unwrap();
    let (_, outcome) = execute(&instrs, &[], 100);
    assert_eq!(outcome, Outcome::OutOfSteps);
}

#[test]
fn execute_zero_steps() {
    let (_, outcome) = execute(&[Write], &[], 0);
    assert_eq!(outcome, Outcome::OutOfSteps);

    let (_, outcome) = execute(&[], &[], 0);
    assert_eq!(outcome, Outcome::Completed(0));
}

#[test]
fn interpret_source_hello() {
    let (state, outcome) =
        interpret_source("++++++++[>++++++++<-]>+.+.", &[], 1000).unwrap();
    assert_eq!(state.outputs, b"AB");
    assert!(matches!(outcome, Outcome::Completed(_)));
}

#[test]
fn interpret_source_skips_loop() {
    let (state, _) = interpret_source("[.]+.", &[], 100).unwrap();
    assert_eq!(state.outputs, [1]);
}

#[test]
fn interpret_source_unbalanced() {
    assert_eq!(
        interpret_source("+]", &[], 100),
        Err(ParseError::UnmatchedClose { position: 1 })
    );
}

#[test]
fn interpret_source_echo_until_eof() {
    let (state, _) = interpret_source(",+[-.,+]", b"hi", 1000).unwrap();
    assert_eq!(state.outputs, b"hi");
}

#[test]
fn execute_cfg_matches_execute() {
    let instrs = parse(",[>+<-]>.").unwrap();
    let cfg = crate::lowering::lower(&instrs).unwrap();

    let (state, outcome) = execute_cfg(&cfg, b"\x05", 1000).unwrap();
    let (expected, _) = execute(&instrs, b"\x05", 1000);

    assert!(matches!(outcome, Outcome::Completed(_)));
    assert_eq!(state.outputs, [5]);
    assert_eq!(state.cell_ptr, expected.cell_ptr);
    assert_eq!(state.cells, expected.cells);
}

#[test]
fn execute_cfg_out_of_bounds() {
    let cfg = crate::lowering::lower(&[PointerIncrement(-2), Write]).unwrap();
    let (_, outcome) = execute_cfg(&cfg, &[], 1000).unwrap();
    assert_eq!(outcome, Outcome::RuntimeError { cell_ptr: -2 });
}
