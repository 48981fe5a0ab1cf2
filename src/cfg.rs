//! A backend-neutral control flow graph, built by lowering a program
//! through `CfgBuilder`.
//!
//! Values live in virtual registers that are each assigned exactly
//! once. Blocks are identified by their position in the function, so
//! `BlockLabel(0)` is always the entry block.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;
use tracing::debug;

use crate::bfir::Cell;
use crate::lowering::{Primitive, TargetEmitter};

#[cfg(test)]
use pretty_assertions::assert_eq;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockLabel(pub usize);

/// A virtual register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reg(pub usize);

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    AllocTape { dest: Reg, num_cells: usize },
    FreeTape { tape: Reg },
    AllocIndex { dest: Reg },
    IndexConst { dest: Reg, value: isize },
    CellConst { dest: Reg, value: Cell },
    LoadIndex { dest: Reg, ptr: Reg },
    StoreIndex { ptr: Reg, value: Reg },
    AddIndex { dest: Reg, lhs: Reg, rhs: Reg },
    CellAddress { dest: Reg, tape: Reg, index: Reg },
    LoadCell { dest: Reg, address: Reg },
    StoreCell { address: Reg, value: Reg },
    AddCell { dest: Reg, lhs: Reg, rhs: Reg },
    IsZero { dest: Reg, value: Reg },
    Call { dest: Reg, callee: Primitive, args: Vec<Reg> },
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Op::AllocTape { dest, num_cells } => write!(f, "{} = tape.alloc {}", dest, num_cells),
            Op::FreeTape { tape } => write!(f, "tape.free {}", tape),
            Op::AllocIndex { dest } => write!(f, "{} = index.alloca", dest),
            Op::IndexConst { dest, value } => write!(f, "{} = index.const {}", dest, value),
            Op::CellConst { dest, value } => write!(f, "{} = cell.const {}", dest, value.0),
            Op::LoadIndex { dest, ptr } => write!(f, "{} = index.load {}", dest, ptr),
            Op::StoreIndex { ptr, value } => write!(f, "index.store {}, {}", value, ptr),
            Op::AddIndex { dest, lhs, rhs } => write!(f, "{} = index.add {}, {}", dest, lhs, rhs),
            Op::CellAddress { dest, tape, index } => {
                write!(f, "{} = cell.addr {}, {}", dest, tape, index)
            }
            Op::LoadCell { dest, address } => write!(f, "{} = cell.load {}", dest, address),
            Op::StoreCell { address, value } => write!(f, "cell.store {}, {}", value, address),
            Op::AddCell { dest, lhs, rhs } => write!(f, "{} = cell.add {}, {}", dest, lhs, rhs),
            Op::IsZero { dest, value } => write!(f, "{} = cell.is_zero {}", dest, value),
            Op::Call { dest, callee, args } => {
                let args = args
                    .iter()
                    .map(|arg| arg.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "{} = call @{}({})", dest, callee, args)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    Branch(BlockLabel),
    CondBranch {
        cond: Reg,
        if_true: BlockLabel,
        if_false: BlockLabel,
    },
    Return(i32),
}

impl Terminator {
    pub fn successors(&self) -> Vec<BlockLabel> {
        match *self {
            Terminator::Branch(target) => vec![target],
            Terminator::CondBranch {
                if_true, if_false, ..
            } => vec![if_true, if_false],
            Terminator::Return(_) => vec![],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    pub label: BlockLabel,
    pub name: String,
    pub ops: Vec<Op>,
    pub terminator: Option<Terminator>,
}

impl BasicBlock {
    pub fn successors(&self) -> Vec<BlockLabel> {
        self.terminator
            .as_ref()
            .map(Terminator::successors)
            .unwrap_or_default()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CfgError {
    #[error("function has no blocks")]
    Empty,
    #[error("block `{0}` has no terminator")]
    Unterminated(String),
    #[error("block `{from}` branches to unknown block {to:?}")]
    UnknownTarget { from: String, to: BlockLabel },
}

/// A single function made of basic blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlFlowGraph {
    name: String,
    blocks: Vec<BasicBlock>,
    num_regs: usize,
}

impl ControlFlowGraph {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    pub fn num_regs(&self) -> usize {
        self.num_regs
    }

    pub fn entry(&self) -> Option<&BasicBlock> {
        self.blocks.first()
    }

    pub fn block(&self, label: BlockLabel) -> Option<&BasicBlock> {
        self.blocks.get(label.0)
    }

    pub fn block_by_name(&self, name: &str) -> Option<&BasicBlock> {
        self.blocks.iter().find(|block| block.name == name)
    }

    pub fn successors(&self, label: BlockLabel) -> Vec<BlockLabel> {
        self.block(label)
            .map(BasicBlock::successors)
            .unwrap_or_default()
    }

    /// Every block that can branch to `label`, in block order. A block
    /// branching to `label` from both arms is listed once.
    pub fn predecessors(&self, label: BlockLabel) -> Vec<BlockLabel> {
        self.blocks
            .iter()
            .filter(|block| block.successors().contains(&label))
            .map(|block| block.label)
            .collect()
    }

    /// Check that every block is terminated and only branches to
    /// blocks of this function.
    pub fn verify(&self) -> Result<(), CfgError> {
        if self.blocks.is_empty() {
            return Err(CfgError::Empty);
        }

        for block in &self.blocks {
            let terminator = block
                .terminator
                .as_ref()
                .ok_or_else(|| CfgError::Unterminated(block.name.clone()))?;

            for target in terminator.successors() {
                if self.block(target).is_none() {
                    return Err(CfgError::UnknownTarget {
                        from: block.name.clone(),
                        to: target,
                    });
                }
            }
        }

        Ok(())
    }

    fn block_name(&self, label: BlockLabel) -> &str {
        self.block(label).map_or("?", |block| block.name.as_str())
    }
}

impl fmt::Display for ControlFlowGraph {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "define i32 @{}() {{", self.name)?;

        for (i, block) in self.blocks.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            writeln!(f, "{}:", block.name)?;

            for op in &block.ops {
                writeln!(f, "  {}", op)?;
            }

            match block.terminator {
                Some(Terminator::Branch(target)) => {
                    writeln!(f, "  br %{}", self.block_name(target))?
                }
                Some(Terminator::CondBranch {
                    cond,
                    if_true,
                    if_false,
                }) => writeln!(
                    f,
                    "  br {}, %{}, %{}",
                    cond,
                    self.block_name(if_true),
                    self.block_name(if_false)
                )?,
                Some(Terminator::Return(code)) => writeln!(f, "  ret {}", code)?,
                None => writeln!(f, "  ; no terminator")?,
            }
        }

        write!(f, "}}")
    }
}

/// A `TargetEmitter` that records what it is asked to emit as a
/// `ControlFlowGraph`.
#[derive(Debug)]
pub struct CfgBuilder {
    name: String,
    blocks: Vec<BasicBlock>,
    current: BlockLabel,
    num_regs: usize,
    primitives: Vec<Primitive>,
    // How many blocks have been given each requested name.
    name_counts: HashMap<String, usize>,
}

impl CfgBuilder {
    /// A builder providing both I/O primitives.
    pub fn new() -> Self {
        Self::with_primitives(&[Primitive::GetChar, Primitive::PutChar])
    }

    /// A builder providing only `primitives`.
    pub fn with_primitives(primitives: &[Primitive]) -> Self {
        CfgBuilder {
            name: String::new(),
            blocks: vec![],
            current: BlockLabel(0),
            num_regs: 0,
            primitives: primitives.to_vec(),
            name_counts: HashMap::new(),
        }
    }

    fn fresh_reg(&mut self) -> Reg {
        let reg = Reg(self.num_regs);
        self.num_regs += 1;
        reg
    }

    // Block names are made unique by numbering repeats: loop_header,
    // loop_header1, loop_header2 and so on.
    fn unique_name(&mut self, name: &str) -> String {
        let count = self.name_counts.entry(name.to_owned()).or_insert(0);
        let unique = if *count == 0 {
            name.to_owned()
        } else {
            format!("{}{}", name, count)
        };
        *count += 1;
        unique
    }

    fn current_block(&mut self) -> &mut BasicBlock {
        &mut self.blocks[self.current.0]
    }

    fn push(&mut self, op: Op) {
        let block = self.current_block();
        debug_assert!(
            block.terminator.is_none(),
            "appending to terminated block {}",
            block.name
        );
        block.ops.push(op);
    }

    fn push_with_dest<F>(&mut self, op: F) -> Reg
    where
        F: FnOnce(Reg) -> Op,
    {
        let dest = self.fresh_reg();
        self.push(op(dest));
        dest
    }

    fn terminate(&mut self, terminator: Terminator) {
        let block = self.current_block();
        debug_assert!(
            block.terminator.is_none(),
            "block {} terminated twice",
            block.name
        );
        block.terminator = Some(terminator);
    }
}

impl Default for CfgBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TargetEmitter for CfgBuilder {
    type Block = BlockLabel;
    type Value = Reg;
    type Callee = Primitive;
    type Output = ControlFlowGraph;

    fn start_function(&mut self, name: &str) -> BlockLabel {
        self.name = name.to_owned();
        self.append_block("entry")
    }

    fn append_block(&mut self, name: &str) -> BlockLabel {
        let label = BlockLabel(self.blocks.len());
        let name = self.unique_name(name);
        self.blocks.push(BasicBlock {
            label,
            name,
            ops: vec![],
            terminator: None,
        });
        label
    }

    fn position_at_end(&mut self, block: BlockLabel) {
        self.current = block;
    }

    fn primitive(&mut self, primitive: Primitive) -> Option<Primitive> {
        if self.primitives.contains(&primitive) {
            Some(primitive)
        } else {
            None
        }
    }

    fn allocate_tape(&mut self, num_cells: usize) -> Reg {
        self.push_with_dest(|dest| Op::AllocTape { dest, num_cells })
    }

    fn free_tape(&mut self, tape: Reg) {
        self.push(Op::FreeTape { tape });
    }

    fn allocate_index(&mut self) -> Reg {
        self.push_with_dest(|dest| Op::AllocIndex { dest })
    }

    fn load_index(&mut self, ptr: Reg) -> Reg {
        self.push_with_dest(|dest| Op::LoadIndex { dest, ptr })
    }

    fn store_index(&mut self, ptr: Reg, value: Reg) {
        self.push(Op::StoreIndex { ptr, value });
    }

    fn index_constant(&mut self, value: isize) -> Reg {
        self.push_with_dest(|dest| Op::IndexConst { dest, value })
    }

    fn add_index(&mut self, lhs: Reg, rhs: Reg) -> Reg {
        self.push_with_dest(|dest| Op::AddIndex { dest, lhs, rhs })
    }

    fn cell_address(&mut self, tape: Reg, index: Reg) -> Reg {
        self.push_with_dest(|dest| Op::CellAddress { dest, tape, index })
    }

    fn load_cell(&mut self, address: Reg) -> Reg {
        self.push_with_dest(|dest| Op::LoadCell { dest, address })
    }

    fn store_cell(&mut self, address: Reg, value: Reg) {
        self.push(Op::StoreCell { address, value });
    }

    fn cell_constant(&mut self, value: Cell) -> Reg {
        self.push_with_dest(|dest| Op::CellConst { dest, value })
    }

    fn add_cell(&mut self, lhs: Reg, rhs: Reg) -> Reg {
        self.push_with_dest(|dest| Op::AddCell { dest, lhs, rhs })
    }

    fn is_zero(&mut self, value: Reg) -> Reg {
        self.push_with_dest(|dest| Op::IsZero { dest, value })
    }

    fn branch(&mut self, target: BlockLabel) {
        self.terminate(Terminator::Branch(target));
    }

    fn cond_branch(&mut self, cond: Reg, if_true: BlockLabel, if_false: BlockLabel) {
        self.terminate(Terminator::CondBranch {
            cond,
            if_true,
            if_false,
        });
    }

    fn call(&mut self, callee: Primitive, args: &[Reg]) -> Reg {
        let args = args.to_vec();
        self.push_with_dest(|dest| Op::Call { dest, callee, args })
    }

    fn ret(&mut self, code: i32) {
        self.terminate(Terminator::Return(code));
    }

    fn finish(self) -> ControlFlowGraph {
        debug!(
            function = %self.name,
            blocks = self.blocks.len(),
            regs = self.num_regs,
            "built control flow graph"
        );

        ControlFlowGraph {
            name: self.name,
            blocks: self.blocks,
            num_regs: self.num_regs,
        }
    }
}

#[test]
fn repeated_block_names_are_numbered() {
    let mut builder = CfgBuilder::new();
    let entry = builder.start_function("main");
    let first = builder.append_block("loop_header");
    let second = builder.append_block("loop_header");
    let third = builder.append_block("loop_header");

    for label in [entry, first, second, third].iter() {
        builder.position_at_end(*label);
        builder.ret(0);
    }

    let cfg = builder.finish();
    let names: Vec<_> = cfg.blocks().iter().map(|b| b.name.as_str()).collect();
    assert_eq!(names, ["entry", "loop_header", "loop_header1", "loop_header2"]);
}

#[test]
fn verify_rejects_unterminated_block() {
    let mut builder = CfgBuilder::new();
    builder.start_function("main");
    let cfg = builder.finish();

    assert_eq!(cfg.verify(), Err(CfgError::Unterminated("entry".to_owned())));
}

#[test]
fn verify_rejects_unknown_target() {
    let mut builder = CfgBuilder::new();
    let entry = builder.start_function("main");
    builder.position_at_end(entry);
    builder.branch(BlockLabel(7));
    let cfg = builder.finish();

    assert_eq!(
        cfg.verify(),
        Err(CfgError::UnknownTarget {
            from: "entry".to_owned(),
            to: BlockLabel(7)
        })
    );
}

#[test]
fn verify_rejects_empty_function() {
    let cfg = CfgBuilder::new().finish();
    assert_eq!(cfg.verify(), Err(CfgError::Empty));
}

#[test]
fn without_primitives_nothing_is_provided() {
    let mut builder = CfgBuilder::with_primitives(&[]);
    assert_eq!(builder.primitive(Primitive::GetChar), None);
    assert_eq!(builder.primitive(Primitive::PutChar), None);
}

#[test]
fn registers_are_assigned_once() {
    let mut builder = CfgBuilder::new();
    let entry = builder.start_function("main");
    builder.position_at_end(entry);
    let a = builder.index_constant(1);
    let b = builder.index_constant(2);
    let c = builder.add_index(a, b);

    assert_eq!((a, b, c), (Reg(0), Reg(1), Reg(2)));
}
