//! Peephole optimisations over a BF program.
//!
//! Every pass is a single left-to-right scan over the top level of a
//! program. Loop bodies are passed through untouched, and no pass is
//! repeated to a fixed point: merging two instructions never re-checks
//! what the merge made adjacent in the output.

use std::num::Wrapping;

use bitflags::bitflags;
use itertools::Itertools;
use tracing::{debug, trace};

use crate::bfir::Instruction::*;
use crate::bfir::Program;

bitflags! {
    /// Which passes to run. Selected passes always run in the order
    /// the flags are declared.
    pub struct OptimisationsFlags: u32 {
        const COMBINE_INCREMENTS = 0b0000_0001;
        const COMBINE_PTR_INCREMENTS = 0b0000_0010;
        const ANNOTATE_KNOWN_ZERO = 0b0000_0100;
        const COMBINE_SETS = 0b0000_1000;
        const ZEROING_LOOPS = 0b0001_0000;
        const COMBINE_SET_AND_INCREMENTS = 0b0010_0000;
        /// Not part of the standard pipeline.
        const REMOVE_DEAD_LOOPS = 0b0100_0000;

        /// The standard pipeline.
        const PIPELINE = Self::COMBINE_INCREMENTS.bits
            | Self::COMBINE_PTR_INCREMENTS.bits
            | Self::ANNOTATE_KNOWN_ZERO.bits
            | Self::COMBINE_SETS.bits
            | Self::ZEROING_LOOPS.bits
            | Self::COMBINE_SET_AND_INCREMENTS.bits;
    }
}

impl Default for OptimisationsFlags {
    fn default() -> Self {
        OptimisationsFlags::PIPELINE
    }
}

type Pass = fn(Program) -> Program;

/// Every pass, in pipeline order.
///
/// `annotate_known_zero` introduces the first `Set`, so it must come
/// before `combine_sets`; `zeroing_loops` introduces the `Set`s that
/// `combine_set_and_increments` folds trailing increments into.
pub(crate) const PASSES: [(OptimisationsFlags, &str, Pass); 7] = [
    (
        OptimisationsFlags::COMBINE_INCREMENTS,
        "combine_increments",
        combine_increments,
    ),
    (
        OptimisationsFlags::COMBINE_PTR_INCREMENTS,
        "combine_ptr_increments",
        combine_ptr_increments,
    ),
    (
        OptimisationsFlags::ANNOTATE_KNOWN_ZERO,
        "annotate_known_zero",
        annotate_known_zero,
    ),
    (
        OptimisationsFlags::COMBINE_SETS,
        "combine_sets",
        combine_sets,
    ),
    (
        OptimisationsFlags::ZEROING_LOOPS,
        "zeroing_loops",
        zeroing_loops,
    ),
    (
        OptimisationsFlags::COMBINE_SET_AND_INCREMENTS,
        "combine_set_and_increments",
        combine_set_and_increments,
    ),
    (
        OptimisationsFlags::REMOVE_DEAD_LOOPS,
        "remove_dead_loops",
        remove_dead_loops,
    ),
];

/// Apply the standard pipeline once.
pub fn optimize(instrs: Program) -> Program {
    optimize_with(instrs, OptimisationsFlags::PIPELINE)
}

/// Apply the passes selected by `flags`, in pipeline order.
pub fn optimize_with(instrs: Program, flags: OptimisationsFlags) -> Program {
    PASSES
        .iter()
        .filter(|(flag, _, _)| flags.contains(*flag))
        .fold(instrs, |instrs, &(_, name, pass)| {
            let before = instrs.len();
            let result = pass(instrs);
            debug!(pass = name, before, after = result.len(), "applied peephole pass");
            result
        })
}

/// Combine consecutive increments into a single increment
/// instruction. A run that sums to zero disappears.
pub fn combine_increments(instrs: Program) -> Program {
    instrs
        .into_iter()
        .coalesce(|prev_instr, instr| match (prev_instr, instr) {
            (Increment(prev_amount), Increment(amount)) => Ok(Increment(prev_amount + amount)),
            (prev_instr, instr) => Err((prev_instr, instr)),
        })
        .filter(|instr| !matches!(instr, Increment(Wrapping(0))))
        .collect()
}

/// Combine consecutive pointer increments. A run that sums to zero
/// disappears.
pub fn combine_ptr_increments(instrs: Program) -> Program {
    instrs
        .into_iter()
        .coalesce(|prev_instr, instr| match (prev_instr, instr) {
            (PointerIncrement(prev_amount), PointerIncrement(amount)) => {
                Ok(PointerIncrement(prev_amount.wrapping_add(amount)))
            }
            (prev_instr, instr) => Err((prev_instr, instr)),
        })
        .filter(|instr| !matches!(instr, PointerIncrement(0)))
        .collect()
}

/// Cells in BF are initialised to zero, so we know the current cell
/// is zero at the start of execution.
pub fn annotate_known_zero(instrs: Program) -> Program {
    let mut result = Vec::with_capacity(instrs.len() + 1);
    result.push(Set(Wrapping(0)));
    result.extend(instrs);
    result
}

/// A set immediately overwritten by another set is dead.
pub fn combine_sets(instrs: Program) -> Program {
    instrs
        .into_iter()
        .coalesce(|prev_instr, instr| match (prev_instr, instr) {
            (Set(_), Set(amount)) => Ok(Set(amount)),
            (prev_instr, instr) => Err((prev_instr, instr)),
        })
        .collect()
}

/// Replace `[-]` with `Set 0`. The loop decrements until the cell
/// reaches zero, from any starting byte.
pub fn zeroing_loops(instrs: Program) -> Program {
    instrs
        .into_iter()
        .map(|instr| match instr {
            Loop(ref body) if matches!(body.as_slice(), [Increment(Wrapping(-1))]) => {
                trace!("replaced zeroing loop");
                Set(Wrapping(0))
            }
            instr => instr,
        })
        .collect()
}

/// Fold an increment into the set before it, since the cell value
/// is known.
pub fn combine_set_and_increments(instrs: Program) -> Program {
    instrs
        .into_iter()
        .coalesce(|prev_instr, instr| match (prev_instr, instr) {
            (Set(set_amount), Increment(inc_amount)) => Ok(Set(set_amount + inc_amount)),
            (prev_instr, instr) => Err((prev_instr, instr)),
        })
        .collect()
}

/// Remove any loops where we know the current cell is zero.
pub fn remove_dead_loops(instrs: Program) -> Program {
    instrs
        .into_iter()
        .coalesce(|prev_instr, instr| match (prev_instr, instr) {
            (Set(Wrapping(0)), Loop(_)) => Ok(Set(Wrapping(0))),
            (prev_instr, instr) => Err((prev_instr, instr)),
        })
        .collect()
}
