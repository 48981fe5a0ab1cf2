#![warn(trivial_numeric_casts)]

//! bfc-cfg is an intermediate representation, a peephole optimizer and a lowering to basic
//! blocks for BF programs.
//! The IR and passes are forked from [bfc](https://github.com/Wilfred/bfc)

use thiserror::Error;
use tracing::debug;

pub use bfir::{
    match_close, match_open, parse, BracketTable, Cell, Instruction, ParseError, Program,
    NUM_CELLS,
};
pub use cfg::{
    BasicBlock, BlockLabel, CfgBuilder, CfgError, ControlFlowGraph, Op, Reg, Terminator,
};
pub use diagnostics::{Info, Level, Position};
pub use execution::{
    execute, execute_cfg, execute_with_state, interpret_source, ExecutionState, Outcome,
};
pub use lowering::{lower, lower_with, LowerError, Primitive, TargetEmitter};
pub use peephole::{optimize, optimize_with, OptimisationsFlags};

mod bfir;
mod cfg;
mod diagnostics;
mod execution;
mod lowering;
pub mod peephole;

#[cfg(test)]
mod peephole_tests;
#[cfg(test)]
mod soundness_tests;

/// Settings for `compile`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileOptions {
    /// The peephole passes to run.
    pub passes: OptimisationsFlags,
    /// The size of the tape the generated function allocates.
    pub num_cells: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            passes: OptimisationsFlags::PIPELINE,
            num_cells: NUM_CELLS,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Lower(#[from] LowerError),
}

/// Parse, optimise and lower `source` to a control flow graph.
pub fn compile(source: &str, options: &CompileOptions) -> Result<ControlFlowGraph, CompileError> {
    let instrs = parse(source)?;
    debug!(instructions = instrs.len(), "parsed source");

    let instrs = optimize_with(instrs, options.passes);
    debug!(instructions = instrs.len(), "optimised program");

    let cfg = lower_with(&instrs, CfgBuilder::new(), options.num_cells)?;
    debug!(blocks = cfg.blocks().len(), "lowered program");

    Ok(cfg)
}
