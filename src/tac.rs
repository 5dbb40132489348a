//! Three-address code: operands, instructions, and the code block the
//! lowerer emits into.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use crate::symbol::{Symbol, SymbolTable};
use crate::types::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "l{}", self.0)
    }
}

/// An instruction operand: a constant, a named symbol (variables and
/// temporaries), or a reference through a computed address. A reference
/// keeps the originally designated symbol as an aliasing hint for later
/// passes.
#[derive(Debug, Clone)]
pub enum TacAddr {
    Const(i64),
    Name(Rc<Symbol>),
    Reference { base: Rc<Symbol>, sym: Rc<Symbol> },
}

impl fmt::Display for TacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Const(v) => write!(f, "{v}"),
            Self::Name(sym) => write!(f, "{}", sym.name()),
            Self::Reference { base, .. } => write!(f, "@{}", base.name()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl fmt::Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelOp {
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl fmt::Display for RelOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Eq => "=",
            Self::Neq => "#",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        })
    }
}

/// One TAC instruction. Comparison branches jump to `target` when the
/// relation holds and fall through otherwise; booleans never appear as
/// materialized operands of a logical instruction.
#[derive(Debug, Clone)]
pub enum Instr {
    Assign {
        dest: TacAddr,
        src: TacAddr,
    },
    Arith {
        op: ArithOp,
        dest: TacAddr,
        lhs: TacAddr,
        rhs: TacAddr,
    },
    Neg {
        dest: TacAddr,
        src: TacAddr,
    },
    Address {
        dest: TacAddr,
        src: TacAddr,
    },
    Deref {
        dest: TacAddr,
        src: TacAddr,
    },
    Branch {
        op: RelOp,
        target: Label,
        lhs: TacAddr,
        rhs: TacAddr,
    },
    Goto {
        target: Label,
    },
    Label(Label),
    Param {
        index: i64,
        src: TacAddr,
    },
    Call {
        dest: Option<TacAddr>,
        func: Rc<Symbol>,
    },
    Return {
        src: Option<TacAddr>,
    },
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Assign { dest, src } => write!(f, "    {dest} <- {src}"),
            Self::Arith { op, dest, lhs, rhs } => write!(f, "    {dest} <- {lhs} {op} {rhs}"),
            Self::Neg { dest, src } => write!(f, "    {dest} <- neg {src}"),
            Self::Address { dest, src } => write!(f, "    {dest} <- &{src}"),
            Self::Deref { dest, src } => write!(f, "    {dest} <- *{src}"),
            Self::Branch { op, target, lhs, rhs } => {
                write!(f, "    if {lhs} {op} {rhs} goto {target}")
            }
            Self::Goto { target } => write!(f, "    goto {target}"),
            Self::Label(label) => write!(f, "{label}:"),
            Self::Param { index, src } => write!(f, "    param {index} <- {src}"),
            Self::Call { dest: Some(d), func } => write!(f, "    {d} <- call {}", func.name()),
            Self::Call { dest: None, func } => write!(f, "    call {}", func.name()),
            Self::Return { src: Some(s) } => write!(f, "    return {s}"),
            Self::Return { src: None } => write!(f, "    return"),
        }
    }
}

impl Instr {
    fn is_unconditional(&self) -> bool {
        matches!(self, Self::Goto { .. } | Self::Return { .. })
    }
}

/// The TAC sink for one scope: label and temporary factories plus the
/// instruction list. `owner` is the scope's symbol table, used to resolve
/// the runtime helpers during array lowering.
pub struct CodeBlock {
    owner: Rc<RefCell<SymbolTable>>,
    instrs: Vec<Instr>,
    next_label: u32,
    next_temp: u32,
}

impl CodeBlock {
    pub fn new(owner: Rc<RefCell<SymbolTable>>) -> Self {
        Self {
            owner,
            instrs: Vec::new(),
            next_label: 0,
            next_temp: 0,
        }
    }

    pub fn create_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    /// A fresh temporary `t<n>`, materialized as a local symbol.
    pub fn create_temp(&mut self, ty: Type) -> Rc<Symbol> {
        let temp = Symbol::local(format!("t{}", self.next_temp), ty);
        self.next_temp += 1;
        temp
    }

    pub fn add_instr(&mut self, instr: Instr) {
        self.instrs.push(instr);
    }

    /// Resolve a name against the owning scope's table chain.
    pub fn find_symbol(&self, name: &str) -> Option<Rc<Symbol>> {
        self.owner.borrow().find(name)
    }

    pub fn instrs(&self) -> &[Instr] {
        &self.instrs
    }

    /// Straighten the emitted stream: drop gotos to a label that follows
    /// immediately (possibly behind other labels), drop unreachable
    /// instructions between an unconditional jump and the next label, and
    /// drop labels no remaining branch refers to. Runs to a fixpoint.
    pub fn cleanup_control_flow(&mut self) {
        loop {
            let mut changed = false;

            let mut i = 0;
            while i < self.instrs.len() {
                if let Instr::Goto { target } = self.instrs[i] {
                    let mut j = i + 1;
                    let mut redundant = false;
                    while let Some(Instr::Label(label)) = self.instrs.get(j) {
                        if *label == target {
                            redundant = true;
                            break;
                        }
                        j += 1;
                    }
                    if redundant {
                        self.instrs.remove(i);
                        changed = true;
                        continue;
                    }
                }
                i += 1;
            }

            let mut i = 0;
            while i < self.instrs.len() {
                if self.instrs[i].is_unconditional() {
                    while let Some(next) = self.instrs.get(i + 1) {
                        if matches!(next, Instr::Label(_)) {
                            break;
                        }
                        self.instrs.remove(i + 1);
                        changed = true;
                    }
                }
                i += 1;
            }

            let mut referenced = HashSet::new();
            for instr in &self.instrs {
                match instr {
                    Instr::Goto { target } | Instr::Branch { target, .. } => {
                        referenced.insert(*target);
                    }
                    _ => {}
                }
            }
            let before = self.instrs.len();
            self.instrs.retain(|instr| match instr {
                Instr::Label(label) => referenced.contains(label),
                _ => true,
            });
            if self.instrs.len() != before {
                changed = true;
            }

            if !changed {
                break;
            }
        }
    }
}

impl fmt::Display for CodeBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for instr in &self.instrs {
            writeln!(f, "{instr}")?;
        }
        Ok(())
    }
}
