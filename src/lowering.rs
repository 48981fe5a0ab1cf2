//! Lowering a BF program to basic blocks.
//!
//! The generated function allocates a zeroed tape and a cell index,
//! runs the program, frees the tape and returns 0. Every loop becomes
//! three blocks:
//!
//! ```text
//! loop_header:
//!   ; load the current cell
//!   br cell_is_zero, loop_after, loop_body
//! loop_body:
//!   ; the loop body, possibly spanning more blocks
//!   br loop_header
//! loop_after:
//!   ; whatever follows the loop
//! ```
//!
//! Moving the cell index is plain integer arithmetic. Nothing here
//! checks it against the tape size: a backend that wants defined
//! behaviour for out-of-range programs must check cell accesses.

use std::fmt;

use thiserror::Error;
use tracing::debug;

use crate::bfir::Instruction::*;
use crate::bfir::{Cell, Instruction, NUM_CELLS};
use crate::cfg::{CfgBuilder, ControlFlowGraph};

/// The external byte I/O routines a compiled program calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    /// Takes no arguments and returns one input byte.
    GetChar,
    /// Takes the byte to output.
    PutChar,
}

impl Primitive {
    pub fn name(self) -> &'static str {
        match self {
            Primitive::GetChar => "getchar",
            Primitive::PutChar => "putchar",
        }
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LowerError {
    #[error("the target does not provide the I/O primitive `{0}`")]
    MissingPrimitive(Primitive),
}

/// The operations lowering needs from a backend.
///
/// Instructions are appended to the block most recently passed to
/// `position_at_end`. A block receives exactly one terminator
/// (`branch`, `cond_branch` or `ret`) and nothing after it.
pub trait TargetEmitter {
    type Block: Copy;
    type Value: Copy;
    type Callee: Copy;
    type Output;

    /// Start the function with a single integer return. Returns its
    /// entry block.
    fn start_function(&mut self, name: &str) -> Self::Block;
    fn append_block(&mut self, name: &str) -> Self::Block;
    fn position_at_end(&mut self, block: Self::Block);

    /// Look up an I/O primitive, if this target provides it.
    fn primitive(&mut self, primitive: Primitive) -> Option<Self::Callee>;

    /// Allocate `num_cells` zeroed bytes, returning the tape base.
    fn allocate_tape(&mut self, num_cells: usize) -> Self::Value;
    fn free_tape(&mut self, tape: Self::Value);

    /// Allocate storage for the cell index.
    fn allocate_index(&mut self) -> Self::Value;
    fn load_index(&mut self, ptr: Self::Value) -> Self::Value;
    fn store_index(&mut self, ptr: Self::Value, value: Self::Value);
    fn index_constant(&mut self, value: isize) -> Self::Value;
    fn add_index(&mut self, lhs: Self::Value, rhs: Self::Value) -> Self::Value;

    /// The address of the cell at `index` on `tape`.
    fn cell_address(&mut self, tape: Self::Value, index: Self::Value) -> Self::Value;
    fn load_cell(&mut self, address: Self::Value) -> Self::Value;
    fn store_cell(&mut self, address: Self::Value, value: Self::Value);
    fn cell_constant(&mut self, value: Cell) -> Self::Value;
    /// Add two cell values, wrapping at the cell width.
    fn add_cell(&mut self, lhs: Self::Value, rhs: Self::Value) -> Self::Value;
    fn is_zero(&mut self, value: Self::Value) -> Self::Value;

    fn branch(&mut self, target: Self::Block);
    fn cond_branch(&mut self, cond: Self::Value, if_true: Self::Block, if_false: Self::Block);
    fn call(&mut self, callee: Self::Callee, args: &[Self::Value]) -> Self::Value;
    fn ret(&mut self, code: i32);

    fn finish(self) -> Self::Output;
}

/// Lower `instrs` to a control flow graph with the default tape size.
pub fn lower(instrs: &[Instruction]) -> Result<ControlFlowGraph, LowerError> {
    lower_with(instrs, CfgBuilder::new(), NUM_CELLS)
}

/// Lower `instrs` through `emitter`, into a function named `main`.
pub fn lower_with<E: TargetEmitter>(
    instrs: &[Instruction],
    mut emitter: E,
    num_cells: usize,
) -> Result<E::Output, LowerError> {
    let getchar = emitter
        .primitive(Primitive::GetChar)
        .ok_or(LowerError::MissingPrimitive(Primitive::GetChar))?;
    let putchar = emitter
        .primitive(Primitive::PutChar)
        .ok_or(LowerError::MissingPrimitive(Primitive::PutChar))?;

    debug!(instructions = instrs.len(), num_cells, "lowering program");

    let entry = emitter.start_function("main");
    emitter.position_at_end(entry);

    let cells = emitter.allocate_tape(num_cells);
    let cell_index_ptr = emitter.allocate_index();
    let zero = emitter.index_constant(0);
    emitter.store_index(cell_index_ptr, zero);

    let mut lowering = Lowering {
        emitter: &mut emitter,
        cells,
        cell_index_ptr,
        getchar,
        putchar,
    };
    let last_block = lowering.lower_instrs(instrs, entry);

    emitter.position_at_end(last_block);
    emitter.free_tape(cells);
    emitter.ret(0);

    Ok(emitter.finish())
}

struct Lowering<'a, E: TargetEmitter> {
    emitter: &'a mut E,
    cells: E::Value,
    cell_index_ptr: E::Value,
    getchar: E::Callee,
    putchar: E::Callee,
}

impl<'a, E: TargetEmitter> Lowering<'a, E> {
    /// Append `instrs` starting in `block`, returning the block that
    /// later instructions should be appended to.
    fn lower_instrs(&mut self, instrs: &[Instruction], block: E::Block) -> E::Block {
        instrs
            .iter()
            .fold(block, |block, instr| self.lower_instr(instr, block))
    }

    fn current_cell_ptr(&mut self) -> E::Value {
        let cell_index = self.emitter.load_index(self.cell_index_ptr);
        self.emitter.cell_address(self.cells, cell_index)
    }

    fn lower_instr(&mut self, instr: &Instruction, block: E::Block) -> E::Block {
        self.emitter.position_at_end(block);

        match instr {
            Increment(amount) => {
                let cell_ptr = self.current_cell_ptr();
                let cell_value = self.emitter.load_cell(cell_ptr);
                let amount = self.emitter.cell_constant(*amount);
                let new_value = self.emitter.add_cell(cell_value, amount);
                self.emitter.store_cell(cell_ptr, new_value);
                block
            }
            PointerIncrement(amount) => {
                let cell_index = self.emitter.load_index(self.cell_index_ptr);
                let amount = self.emitter.index_constant(*amount);
                let new_index = self.emitter.add_index(cell_index, amount);
                self.emitter.store_index(self.cell_index_ptr, new_index);
                block
            }
            Set(amount) => {
                let cell_ptr = self.current_cell_ptr();
                let amount = self.emitter.cell_constant(*amount);
                self.emitter.store_cell(cell_ptr, amount);
                block
            }
            Read => {
                let cell_ptr = self.current_cell_ptr();
                let input_byte = self.emitter.call(self.getchar, &[]);
                self.emitter.store_cell(cell_ptr, input_byte);
                block
            }
            Write => {
                let cell_ptr = self.current_cell_ptr();
                let cell_value = self.emitter.load_cell(cell_ptr);
                self.emitter.call(self.putchar, &[cell_value]);
                block
            }
            Loop(body) => self.lower_loop(body, block),
        }
    }

    fn lower_loop(&mut self, body: &[Instruction], block: E::Block) -> E::Block {
        let loop_header = self.emitter.append_block("loop_header");
        let loop_body = self.emitter.append_block("loop_body");
        let loop_after = self.emitter.append_block("loop_after");

        // We start by entering the loop header from the previous
        // instructions.
        self.emitter.position_at_end(block);
        self.emitter.branch(loop_header);

        self.emitter.position_at_end(loop_header);
        let cell_ptr = self.current_cell_ptr();
        let cell_value = self.emitter.load_cell(cell_ptr);
        let cell_is_zero = self.emitter.is_zero(cell_value);
        self.emitter.cond_branch(cell_is_zero, loop_after, loop_body);

        // Nested loops leave us in a different block from the one we
        // started the body in.
        let body_end = self.lower_instrs(body, loop_body);
        self.emitter.position_at_end(body_end);
        self.emitter.branch(loop_header);

        loop_after
    }
}
