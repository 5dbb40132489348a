//! Type checking.
//!
//! The checker is a read-only recursive walk over the AST. The first failure
//! wins: checking stops and the offending token plus a short message travel
//! up as a [`CheckError`]. A type-clean tree is the lowerer's precondition.

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::ast::{
    ArrayDesignator, BinaryOp, Constant, Designator, Expr, FunctionCall, Scope, SpecialKind,
    SpecialOp, Stmt, StmtKind, StringConstant, UnOp, UnaryOp, VarDesignator,
};
use crate::token::Token;
use crate::types::Type;

/// A single diagnostic: the offending token and a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{token}: {message}")]
pub struct CheckError {
    pub token: Token,
    pub message: String,
}

impl CheckError {
    fn new(token: &Token, message: &str) -> Self {
        Self {
            token: token.clone(),
            message: message.into(),
        }
    }
}

fn fail<T>(token: &Token, message: &str) -> Result<T, CheckError> {
    Err(CheckError::new(token, message))
}

pub trait Check {
    fn check(&self) -> Result<(), CheckError>;
}

impl Check for Scope {
    /// Checks the statement sequence in order, then the nested scopes in
    /// declaration order. An unexpected panic inside the walk is converted
    /// into a clean failure anchored at the scope's token.
    fn check(&self) -> Result<(), CheckError> {
        catch_unwind(AssertUnwindSafe(|| {
            if let Some(first) = self.statement_sequence() {
                for stmt in first.iter() {
                    stmt.check()?;
                }
            }
            for child in self.children() {
                child.check()?;
            }
            Ok(())
        }))
        .unwrap_or_else(|_| fail(self.token(), "internal error during type checking"))
    }
}

impl Check for Stmt {
    fn check(&self) -> Result<(), CheckError> {
        match &self.kind {
            StmtKind::Assign { lhs, rhs } => {
                lhs.check()?;
                rhs.check()?;
                let lhs_ty = lhs.ty().expect("checked designator has a type");
                if !lhs_ty.is_scalar() {
                    return fail(rhs.token(), "left handside designator must be scalar type");
                }
                let rhs_ty = rhs.ty().expect("checked expression has a type");
                if !rhs_ty.matches(&lhs_ty) {
                    return fail(
                        rhs.token(),
                        "right handside expression must be same type as left handside designator",
                    );
                }
                Ok(())
            }
            StmtKind::Call(call) => call.check(),
            StmtKind::Return { ret_ty, expr } => {
                if ret_ty.matches(&Type::Null) {
                    if let Some(e) = expr {
                        return fail(e.token(), "superfluous expression after return.");
                    }
                    return Ok(());
                }
                let Some(e) = expr else {
                    return fail(self.token(), "expression expected after return.");
                };
                e.check()?;
                let e_ty = e.ty().expect("checked expression has a type");
                if !ret_ty.matches(&e_ty) {
                    return fail(e.token(), "return type mismatch.");
                }
                Ok(())
            }
            StmtKind::If {
                cond,
                then_body,
                else_body,
            } => {
                cond.check()?;
                if let Some(first) = then_body.as_deref() {
                    for stmt in first.iter() {
                        stmt.check()?;
                    }
                }
                if let Some(first) = else_body.as_deref() {
                    for stmt in first.iter() {
                        stmt.check()?;
                    }
                }
                check_condition(cond)
            }
            StmtKind::While { cond, body } => {
                cond.check()?;
                if let Some(first) = body.as_deref() {
                    for stmt in first.iter() {
                        stmt.check()?;
                    }
                }
                check_condition(cond)
            }
            StmtKind::Break => Ok(()),
        }
    }
}

fn check_condition(cond: &Expr) -> Result<(), CheckError> {
    let ty = cond.ty().expect("checked expression has a type");
    if !ty.matches(&Type::Bool) {
        return fail(cond.token(), "expected boolean type condition");
    }
    Ok(())
}

impl Check for Expr {
    fn check(&self) -> Result<(), CheckError> {
        match self {
            Self::Binary(n) => n.check(),
            Self::Unary(n) => n.check(),
            Self::Special(n) => n.check(),
            Self::Call(n) => n.check(),
            Self::Designator(n) => n.check(),
            Self::Constant(n) => n.check(),
            Self::Str(n) => n.check(),
        }
    }
}

impl Check for BinaryOp {
    fn check(&self) -> Result<(), CheckError> {
        self.left.check()?;
        self.right.check()?;

        let left_ty = self.left.ty().expect("checked expression has a type");
        let right_ty = self.right.ty().expect("checked expression has a type");

        if self.op.is_arith() {
            if !left_ty.matches(&Type::Int) {
                return fail(
                    self.left.token(),
                    "expected integer type expression in left operand",
                );
            }
            if !right_ty.matches(&Type::Int) {
                return fail(
                    self.right.token(),
                    "expected integer type expression in right operand",
                );
            }
            return Ok(());
        }

        if self.op.is_logical() {
            if !left_ty.matches(&Type::Bool) {
                return fail(
                    self.left.token(),
                    "expected boolean type expression in left operand",
                );
            }
            if !right_ty.matches(&Type::Bool) {
                return fail(
                    self.right.token(),
                    "expected boolean type expression in right operand",
                );
            }
            return Ok(());
        }

        // equality and ordering: the left operand picks the type, the right
        // operand must match it
        let allowed = if self.op.is_equality() {
            left_ty.matches(&Type::Bool)
                || left_ty.matches(&Type::Char)
                || left_ty.matches(&Type::Int)
        } else {
            left_ty.matches(&Type::Char) || left_ty.matches(&Type::Int)
        };
        if !allowed {
            let message = if self.op.is_equality() {
                "expected boolean or character or integer type expression in left operand"
            } else {
                "expected character or integer type expression in left operand"
            };
            return fail(self.left.token(), message);
        }
        if !right_ty.matches(&left_ty) {
            return fail(
                self.right.token(),
                "different type between right and left operand",
            );
        }
        Ok(())
    }
}

impl Check for UnaryOp {
    fn check(&self) -> Result<(), CheckError> {
        self.operand.check()?;
        let ty = self.operand.ty().expect("checked expression has a type");
        match self.op {
            UnOp::Neg | UnOp::Pos => {
                if !ty.matches(&Type::Int) {
                    return fail(
                        self.operand.token(),
                        "expected integer type expression in the operand",
                    );
                }
                Ok(())
            }
            UnOp::Not => {
                if !ty.matches(&Type::Bool) {
                    return fail(
                        self.operand.token(),
                        "expected boolean type expression in the operand",
                    );
                }
                Ok(())
            }
        }
    }
}

impl Check for SpecialOp {
    fn check(&self) -> Result<(), CheckError> {
        self.operand.check()?;
        match self.kind {
            SpecialKind::Address => {
                let ty = self.operand.ty().expect("checked expression has a type");
                if !ty.is_array() {
                    return fail(self.token(), "address-of is only used on array type");
                }
                Ok(())
            }
            SpecialKind::Deref => {
                let ty = self.operand.ty().expect("checked expression has a type");
                if !ty.is_pointer() {
                    return fail(self.token(), "dereference should be used on pointer type");
                }
                Ok(())
            }
            SpecialKind::Cast => fail(self.token(), "cast is never used"),
        }
    }
}

impl Check for FunctionCall {
    fn check(&self) -> Result<(), CheckError> {
        let symbol = self.symbol();
        if symbol.n_params() != self.n_args() {
            return fail(
                self.token(),
                "number of arguments does not match the number of parameters",
            );
        }
        for i in 0..self.n_args() {
            self.arg(i).check()?;
        }
        for i in 0..symbol.n_params() {
            let param = symbol.param_at(i);
            let arg = self.arg(i);
            if param.ty().matches(&Type::Null) {
                return fail(arg.token(), "argument's type is invalid");
            }
            let arg_ty = arg.ty().expect("checked expression has a type");
            if !param.ty().matches(&arg_ty) {
                return fail(
                    self.token(),
                    "argument's type does not match with the parameter",
                );
            }
        }
        Ok(())
    }
}

impl Check for Designator {
    fn check(&self) -> Result<(), CheckError> {
        match self {
            Self::Var(d) => d.check(),
            Self::Array(d) => d.check(),
        }
    }
}

impl Check for VarDesignator {
    fn check(&self) -> Result<(), CheckError> {
        if self.symbol().ty().matches(&Type::Null) {
            return fail(self.token(), "Invalid Type for the symbol");
        }
        Ok(())
    }
}

impl Check for ArrayDesignator {
    fn check(&self) -> Result<(), CheckError> {
        assert!(self.is_done(), "array designator checked before completion");

        let mut base = self.symbol().ty().clone();
        if let Type::Pointer { base: inner } = base {
            base = *inner;
        }
        if !base.is_array() {
            return fail(
                self.token(),
                "symbol's type should be array or pointer of array",
            );
        }

        for idx in self.indices() {
            idx.check()?;
            let idx_ty = idx.ty().expect("checked expression has a type");
            if !idx_ty.matches(&Type::Int) {
                return fail(idx.token(), "index in array designator must be integer type");
            }
        }

        match self.ty() {
            None => fail(self.token(), "Too many indices"),
            Some(t) if t.is_array() => fail(self.token(), "Not enough indices"),
            Some(_) => Ok(()),
        }
    }
}

impl Check for Constant {
    fn check(&self) -> Result<(), CheckError> {
        match self.declared_ty() {
            Type::Int => {
                if self.value() < -2_147_483_648 || self.value() > 2_147_483_647 {
                    return fail(self.token(), "invalid value for integer type constant");
                }
                Ok(())
            }
            Type::Char => {
                if self.value() < 0 || self.value() > 255 {
                    return fail(self.token(), "invalid value for character type constant");
                }
                Ok(())
            }
            Type::Bool => {
                if self.value() != 0 && self.value() != 1 {
                    return fail(self.token(), "invalid value for boolean type constant");
                }
                Ok(())
            }
            _ => fail(self.token(), "invalid type for constant"),
        }
    }
}

impl Check for StringConstant {
    fn check(&self) -> Result<(), CheckError> {
        Ok(())
    }
}
