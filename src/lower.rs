//! Lowering the AST to three-address code.
//!
//! Expressions lower in one of two modes. Value mode returns an addressable
//! result. Branch mode takes a true label and a false label and emits
//! conditional jumps instead of materializing a boolean, which is what makes
//! `and`/`or` short-circuit. Statements receive the label to continue at and
//! the label a `break` leaves to; every statement ends in an explicit goto
//! and the cleanup pass straightens the redundant ones out afterwards.
//!
//! The lowerer assumes a type-clean tree and produces no diagnostics.

use std::rc::Rc;

use crate::ast::{
    ArrayDesignator, BinOp, BinaryOp, Constant, Designator, Expr, FunctionCall, Scope, SpecialKind,
    SpecialOp, Stmt, StmtKind, UnOp, UnaryOp, VarDesignator,
};
use crate::tac::{ArithOp, CodeBlock, Instr, Label, RelOp, TacAddr};
use crate::token::Token;
use crate::types::Type;

impl Scope {
    /// Lower every top-level statement, then straighten the control flow.
    /// Child scopes lower into their own code blocks.
    pub fn to_tac(&self, cb: &mut CodeBlock) {
        if let Some(first) = self.statement_sequence() {
            for stmt in first.iter() {
                let next = cb.create_label();
                stmt.to_tac(cb, next, None);
                cb.add_instr(Instr::Label(next));
            }
        }
        cb.cleanup_control_flow();
    }

    /// Build a code block over this scope's symbol table and lower into it.
    pub fn lower(&self) -> CodeBlock {
        let mut cb = CodeBlock::new(Rc::clone(self.symtab()));
        self.to_tac(&mut cb);
        cb
    }
}

fn lower_seq(cb: &mut CodeBlock, first: Option<&Stmt>, end: Option<Label>) {
    if let Some(first) = first {
        for stmt in first.iter() {
            let next = cb.create_label();
            stmt.to_tac(cb, next, end);
            cb.add_instr(Instr::Label(next));
        }
    }
}

impl Stmt {
    /// `next` is where normal completion continues; `end` is where a `break`
    /// leaves to and is only set inside a loop body.
    pub fn to_tac(&self, cb: &mut CodeBlock, next: Label, end: Option<Label>) {
        match &self.kind {
            StmtKind::Assign { lhs, rhs } => {
                let src = rhs.to_tac(cb);
                let dest = lhs.to_tac(cb);
                cb.add_instr(Instr::Assign { dest, src });
                cb.add_instr(Instr::Goto { target: next });
            }
            StmtKind::Call(call) => {
                call.to_tac(cb);
                cb.add_instr(Instr::Goto { target: next });
            }
            StmtKind::Return { expr, .. } => {
                let src = expr.as_ref().map(|e| e.to_tac(cb));
                cb.add_instr(Instr::Return { src });
                cb.add_instr(Instr::Goto { target: next });
            }
            StmtKind::If {
                cond,
                then_body,
                else_body,
            } => {
                let then_label = cb.create_label();
                let else_label = cb.create_label();
                let end_label = cb.create_label();
                cond.to_tac_branch(cb, then_label, else_label);
                cb.add_instr(Instr::Label(then_label));
                lower_seq(cb, then_body.as_deref(), end);
                cb.add_instr(Instr::Goto { target: end_label });
                cb.add_instr(Instr::Label(else_label));
                lower_seq(cb, else_body.as_deref(), end);
                cb.add_instr(Instr::Label(end_label));
                cb.add_instr(Instr::Goto { target: next });
            }
            StmtKind::While { cond, body } => {
                let head = cb.create_label();
                let body_label = cb.create_label();
                let loop_end = cb.create_label();
                cb.add_instr(Instr::Label(head));
                cond.to_tac_branch(cb, body_label, loop_end);
                cb.add_instr(Instr::Label(body_label));
                lower_seq(cb, body.as_deref(), Some(loop_end));
                cb.add_instr(Instr::Goto { target: head });
                cb.add_instr(Instr::Label(loop_end));
                cb.add_instr(Instr::Goto { target: next });
            }
            StmtKind::Break => {
                let end = end.expect("break lowered outside of a loop");
                cb.add_instr(Instr::Goto { target: end });
            }
        }
    }
}

impl Expr {
    /// Value mode: emit code and return an addressable result.
    pub fn to_tac(&self, cb: &mut CodeBlock) -> TacAddr {
        match self {
            Self::Binary(n) => n.to_tac(cb),
            Self::Unary(n) => n.to_tac(cb),
            Self::Special(n) => n.to_tac(cb),
            Self::Call(n) => n
                .to_tac(cb)
                .expect("value use of a call without return type"),
            Self::Designator(n) => n.to_tac(cb),
            Self::Constant(n) => TacAddr::Const(n.value()),
            Self::Str(n) => TacAddr::Name(Rc::clone(n.symbol())),
        }
    }

    /// Branch mode, defined for boolean expressions: jump to `ltrue` or
    /// `lfalse`, materializing nothing.
    pub fn to_tac_branch(&self, cb: &mut CodeBlock, ltrue: Label, lfalse: Label) {
        match self {
            Self::Binary(n) => n.to_tac_branch(cb, ltrue, lfalse),
            Self::Unary(n) => n.to_tac_branch(cb, ltrue, lfalse),
            // any other boolean value source: test the value against true
            Self::Special(_) | Self::Call(_) | Self::Designator(_) | Self::Constant(_) => {
                let value = self.to_tac(cb);
                cb.add_instr(Instr::Branch {
                    op: RelOp::Eq,
                    target: ltrue,
                    lhs: value,
                    rhs: TacAddr::Const(1),
                });
                cb.add_instr(Instr::Goto { target: lfalse });
            }
            Self::Str(_) => unreachable!("branch lowering of a string constant"),
        }
    }
}

/// Materialize a branch-mode lowering into a fresh boolean temporary that
/// ends up holding 1 or 0.
fn materialize_bool(
    cb: &mut CodeBlock,
    branch: impl FnOnce(&mut CodeBlock, Label, Label),
) -> TacAddr {
    let dest = TacAddr::Name(cb.create_temp(Type::Bool));
    let ltrue = cb.create_label();
    let lfalse = cb.create_label();
    let lnext = cb.create_label();
    branch(cb, ltrue, lfalse);
    cb.add_instr(Instr::Label(ltrue));
    cb.add_instr(Instr::Assign {
        dest: dest.clone(),
        src: TacAddr::Const(1),
    });
    cb.add_instr(Instr::Goto { target: lnext });
    cb.add_instr(Instr::Label(lfalse));
    cb.add_instr(Instr::Assign {
        dest: dest.clone(),
        src: TacAddr::Const(0),
    });
    cb.add_instr(Instr::Label(lnext));
    dest
}

fn arith_op(op: BinOp) -> ArithOp {
    match op {
        BinOp::Add => ArithOp::Add,
        BinOp::Sub => ArithOp::Sub,
        BinOp::Mul => ArithOp::Mul,
        BinOp::Div => ArithOp::Div,
        _ => unreachable!("not an arithmetic operator"),
    }
}

fn rel_op(op: BinOp) -> RelOp {
    match op {
        BinOp::Eq => RelOp::Eq,
        BinOp::Neq => RelOp::Neq,
        BinOp::Lt => RelOp::Lt,
        BinOp::Le => RelOp::Le,
        BinOp::Gt => RelOp::Gt,
        BinOp::Ge => RelOp::Ge,
        _ => unreachable!("not a comparison operator"),
    }
}

impl BinaryOp {
    fn to_tac(&self, cb: &mut CodeBlock) -> TacAddr {
        if self.op.is_arith() {
            let lhs = self.left.to_tac(cb);
            let rhs = self.right.to_tac(cb);
            let dest = TacAddr::Name(cb.create_temp(Type::Int));
            cb.add_instr(Instr::Arith {
                op: arith_op(self.op),
                dest: dest.clone(),
                lhs,
                rhs,
            });
            dest
        } else {
            materialize_bool(cb, |cb, lt, lf| self.to_tac_branch(cb, lt, lf))
        }
    }

    fn to_tac_branch(&self, cb: &mut CodeBlock, ltrue: Label, lfalse: Label) {
        match self.op {
            BinOp::And => {
                let mid = cb.create_label();
                self.left.to_tac_branch(cb, mid, lfalse);
                cb.add_instr(Instr::Label(mid));
                self.right.to_tac_branch(cb, ltrue, lfalse);
            }
            BinOp::Or => {
                let mid = cb.create_label();
                self.left.to_tac_branch(cb, ltrue, mid);
                cb.add_instr(Instr::Label(mid));
                self.right.to_tac_branch(cb, ltrue, lfalse);
            }
            op => {
                let lhs = self.left.to_tac(cb);
                let rhs = self.right.to_tac(cb);
                cb.add_instr(Instr::Branch {
                    op: rel_op(op),
                    target: ltrue,
                    lhs,
                    rhs,
                });
                cb.add_instr(Instr::Goto { target: lfalse });
            }
        }
    }
}

impl UnaryOp {
    fn to_tac(&self, cb: &mut CodeBlock) -> TacAddr {
        match self.op {
            UnOp::Neg => {
                let src = self.operand.to_tac(cb);
                let dest = TacAddr::Name(cb.create_temp(Type::Int));
                cb.add_instr(Instr::Neg {
                    dest: dest.clone(),
                    src,
                });
                dest
            }
            // unary plus changes nothing
            UnOp::Pos => self.operand.to_tac(cb),
            UnOp::Not => materialize_bool(cb, |cb, lt, lf| self.to_tac_branch(cb, lt, lf)),
        }
    }

    fn to_tac_branch(&self, cb: &mut CodeBlock, ltrue: Label, lfalse: Label) {
        // `not` swaps the labels of its operand
        self.operand.to_tac_branch(cb, lfalse, ltrue);
    }
}

impl SpecialOp {
    fn to_tac(&self, cb: &mut CodeBlock) -> TacAddr {
        let src = self.operand.to_tac(cb);
        let ty = self.ty().expect("special op over a well-typed operand");
        let dest = TacAddr::Name(cb.create_temp(ty));
        let instr = match self.kind {
            SpecialKind::Address => Instr::Address {
                dest: dest.clone(),
                src,
            },
            SpecialKind::Deref => Instr::Deref {
                dest: dest.clone(),
                src,
            },
            SpecialKind::Cast => unreachable!("cast never survives type checking"),
        };
        cb.add_instr(instr);
        dest
    }
}

impl FunctionCall {
    /// Push the arguments in reverse index order, then call. Returns the
    /// result temporary, or `None` for a procedure without return type.
    pub fn to_tac(&self, cb: &mut CodeBlock) -> Option<TacAddr> {
        let dest = if self.symbol().ty().matches(&Type::Null) {
            None
        } else {
            Some(TacAddr::Name(cb.create_temp(self.symbol().ty().clone())))
        };
        for i in (0..self.n_args()).rev() {
            let src = self.arg(i).to_tac(cb);
            cb.add_instr(Instr::Param {
                index: i as i64,
                src,
            });
        }
        cb.add_instr(Instr::Call {
            dest: dest.clone(),
            func: Rc::clone(self.symbol()),
        });
        dest
    }
}

impl Designator {
    fn to_tac(&self, cb: &mut CodeBlock) -> TacAddr {
        match self {
            Self::Var(d) => TacAddr::Name(Rc::clone(d.symbol())),
            Self::Array(d) => d.to_tac(cb),
        }
    }
}

fn int_const(value: i64) -> Expr {
    Expr::Constant(Constant::new(Token::default(), Type::Int, value))
}

fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary(BinaryOp::new(Token::default(), op, left, right))
}

impl ArrayDesignator {
    /// Compute the element address and return a reference through it.
    ///
    /// The flattened offset is built as a synthetic expression tree and sent
    /// through the regular value-mode lowering: Horner multiplication over
    /// the indices, with the runtime `DIM(ptr, k)` supplying the inner
    /// dimension sizes and the static element size as the innermost
    /// multiplier, plus `DOFS(ptr)` for the payload offset inside the array
    /// header. Missing trailing indices are padded with zero.
    fn to_tac(&self, cb: &mut CodeBlock) -> TacAddr {
        let tok = Token::default();

        // the array pointer: the symbol itself when it is already a
        // pointer, the address of the array otherwise
        let designator = Expr::Designator(Designator::Var(VarDesignator::new(
            tok.clone(),
            Rc::clone(self.symbol()),
        )));
        let (array_ty, array_ptr) = match self.symbol().ty() {
            Type::Pointer { base } => ((**base).clone(), designator),
            ty @ Type::Array { .. } => (
                ty.clone(),
                Expr::Special(SpecialOp::new(
                    tok.clone(),
                    SpecialKind::Address,
                    designator,
                    None,
                )),
            ),
            _ => panic!("array designator over a non-array symbol"),
        };

        // static rank and innermost element size
        let mut elem = &array_ty;
        let mut rank = 0;
        while let Some(inner) = elem.inner_type() {
            rank += 1;
            elem = inner;
        }
        let elem_size = elem.size() as i64;

        let mut indices: Vec<Expr> = self.indices().to_vec();
        while indices.len() < rank {
            indices.push(int_const(0));
        }

        let dim = cb
            .find_symbol("DIM")
            .expect("runtime helper DIM is declared");
        let dofs = cb
            .find_symbol("DOFS")
            .expect("runtime helper DOFS is declared");

        let count = indices.len();
        let mut offset: Option<Expr> = None;
        for (i, idx) in indices.into_iter().enumerate() {
            let acc = match offset.take() {
                None => idx,
                Some(sum) => binary(BinOp::Add, sum, idx),
            };
            let factor = if i == count - 1 {
                int_const(elem_size)
            } else {
                // dimension numbering in the helper is 1-based and the
                // multiplier for index i is the size of dimension i+2
                let mut dim_call = FunctionCall::new(tok.clone(), Rc::clone(&dim));
                dim_call.add_arg(array_ptr.clone());
                dim_call.add_arg(int_const(i as i64 + 2));
                Expr::Call(dim_call)
            };
            offset = Some(binary(BinOp::Mul, acc, factor));
        }
        let offset = offset.expect("an array type has at least one dimension");

        let mut dofs_call = FunctionCall::new(tok, Rc::clone(&dofs));
        dofs_call.add_arg(array_ptr.clone());
        let address = binary(
            BinOp::Add,
            array_ptr,
            binary(BinOp::Add, offset, Expr::Call(dofs_call)),
        );

        let base = match address.to_tac(cb) {
            TacAddr::Name(sym) => sym,
            other => {
                let temp = cb.create_temp(Type::Int);
                cb.add_instr(Instr::Assign {
                    dest: TacAddr::Name(Rc::clone(&temp)),
                    src: other,
                });
                temp
            }
        };
        TacAddr::Reference {
            base,
            sym: Rc::clone(self.symbol()),
        }
    }
}
