//! Lowering scenarios: build an AST, lower it, assert on the emitted
//! instruction stream after control-flow cleanup.

use std::rc::Rc;

use snuplc::ast::{
    ArrayDesignator, BinOp, BinaryOp, Constant, Designator, Expr, FunctionCall, Scope, Stmt,
    UnOp, UnaryOp, VarDesignator,
};
use snuplc::symbol::Symbol;
use snuplc::tac::{CodeBlock, Instr, Label, TacAddr};
use snuplc::token::Token;
use snuplc::types::Type;

fn tok(v: &str) -> Token {
    Token::new(v, 1, 1)
}

fn module() -> Scope {
    Scope::module(tok("module"), "test")
}

fn int(v: i64) -> Expr {
    Expr::Constant(Constant::new(tok(&v.to_string()), Type::Int, v))
}

fn var(sym: &Rc<Symbol>) -> Expr {
    Expr::Designator(Designator::Var(VarDesignator::new(
        tok(sym.name()),
        Rc::clone(sym),
    )))
}

fn lhs(sym: &Rc<Symbol>) -> Designator {
    Designator::Var(VarDesignator::new(tok(sym.name()), Rc::clone(sym)))
}

fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary(BinaryOp::new(tok("op"), op, left, right))
}

/// Register the array runtime helpers the lowerer resolves by name.
fn with_runtime_helpers(m: &Scope) {
    let arr = Type::pointer_to(Type::open_array(Type::Int));
    m.symtab().borrow_mut().add(Symbol::proc(
        "DIM",
        Type::Int,
        vec![Symbol::param("a", arr.clone()), Symbol::param("d", Type::Int)],
    ));
    m.symtab().borrow_mut().add(Symbol::proc(
        "DOFS",
        Type::Int,
        vec![Symbol::param("a", arr)],
    ));
}

/// Every jump target must be emitted exactly once in the same block.
fn assert_label_integrity(cb: &CodeBlock) {
    let defined: Vec<Label> = cb
        .instrs()
        .iter()
        .filter_map(|i| match i {
            Instr::Label(l) => Some(*l),
            _ => None,
        })
        .collect();
    for instr in cb.instrs() {
        let target = match instr {
            Instr::Goto { target } => Some(*target),
            Instr::Branch { target, .. } => Some(*target),
            _ => None,
        };
        if let Some(t) = target {
            assert_eq!(
                defined.iter().filter(|l| **l == t).count(),
                1,
                "jump target emitted exactly once: {cb}"
            );
        }
    }
}

#[test]
fn arithmetic_assignment() {
    let mut m = module();
    let x = m.create_var("x", Type::Int);
    let rhs = binary(BinOp::Add, int(1), binary(BinOp::Mul, int(2), int(3)));
    m.set_statement_sequence(Stmt::assign(tok(":="), lhs(&x), rhs));

    let cb = m.lower();
    assert_eq!(
        cb.to_string(),
        "    t0 <- 2 * 3\n\
         \x20   t1 <- 1 + t0\n\
         \x20   x <- t1\n"
    );
}

#[test]
fn if_else_linearization() {
    let mut m = module();
    let a = m.create_var("a", Type::Int);
    let b = m.create_var("b", Type::Int);
    let c = m.create_var("c", Type::Int);
    let then_body = Stmt::assign(tok(":="), lhs(&c), int(1));
    let else_body = Stmt::assign(tok(":="), lhs(&c), int(2));
    let cond = binary(BinOp::Lt, var(&a), var(&b));
    m.set_statement_sequence(Stmt::if_(tok("if"), cond, Some(then_body), Some(else_body)));

    let cb = m.lower();
    assert_label_integrity(&cb);
    assert_eq!(
        cb.to_string(),
        "    if a < b goto l1\n\
         \x20   goto l2\n\
         l1:\n\
         \x20   c <- 1\n\
         \x20   goto l3\n\
         l2:\n\
         \x20   c <- 2\n\
         l3:\n"
    );
}

#[test]
fn while_with_break() {
    let mut m = module();
    let i = m.create_var("i", Type::Int);
    let n = m.create_var("n", Type::Int);
    let k = m.create_var("k", Type::Int);

    // while (i < n) do i := i + 1; if i = k then break end end
    let mut incr = Stmt::assign(
        tok(":="),
        lhs(&i),
        binary(BinOp::Add, var(&i), int(1)),
    );
    let brk = Stmt::break_(tok("break"));
    let cond_eq = binary(BinOp::Eq, var(&i), var(&k));
    incr.set_next(Stmt::if_(tok("if"), cond_eq, Some(brk), None));
    let cond = binary(BinOp::Lt, var(&i), var(&n));
    m.set_statement_sequence(Stmt::while_(tok("while"), cond, Some(incr)));

    let cb = m.lower();
    assert_label_integrity(&cb);
    assert_eq!(
        cb.to_string(),
        "l1:\n\
         \x20   if i < n goto l2\n\
         \x20   goto l3\n\
         l2:\n\
         \x20   t0 <- i + 1\n\
         \x20   i <- t0\n\
         \x20   if i = k goto l6\n\
         \x20   goto l7\n\
         l6:\n\
         \x20   goto l3\n\
         l7:\n\
         \x20   goto l1\n\
         l3:\n"
    );

    // the break jumps to the same label the exit test falls through to,
    // the one straight after the loop body
    let exits = cb
        .instrs()
        .iter()
        .filter(|i| matches!(i, Instr::Goto { target } if format!("{target}") == "l3"))
        .count();
    assert_eq!(exits, 2);
}

#[test]
fn short_circuit_and_skips_the_right_operand() {
    let mut m = module();
    let b = m.create_var("b", Type::Bool);
    let x = m.create_var("x", Type::Int);
    let p = Symbol::proc("p", Type::Bool, vec![]);
    m.symtab().borrow_mut().add(Rc::clone(&p));

    // b := (x > 0) and p()
    let left = binary(BinOp::Gt, var(&x), int(0));
    let right = Expr::Call(FunctionCall::new(tok("p"), p));
    let rhs = binary(BinOp::And, left, right);
    m.set_statement_sequence(Stmt::assign(tok(":="), lhs(&b), rhs));

    let cb = m.lower();
    assert_label_integrity(&cb);
    assert_eq!(
        cb.to_string(),
        "    if x > 0 goto l4\n\
         \x20   goto l2\n\
         l4:\n\
         \x20   t1 <- call p\n\
         \x20   if t1 = 1 goto l1\n\
         \x20   goto l2\n\
         l1:\n\
         \x20   t0 <- 1\n\
         \x20   goto l3\n\
         l2:\n\
         \x20   t0 <- 0\n\
         l3:\n\
         \x20   b <- t0\n"
    );

    // the false edge of the left operand lands past the call
    let call_at = cb
        .instrs()
        .iter()
        .position(|i| matches!(i, Instr::Call { .. }))
        .unwrap();
    let false_label_at = cb
        .instrs()
        .iter()
        .position(|i| matches!(i, Instr::Label(l) if format!("{l}") == "l2"))
        .unwrap();
    assert!(false_label_at > call_at);
}

#[test]
fn boolean_designator_condition_tests_against_true() {
    let mut m = module();
    let b = m.create_var("b", Type::Bool);
    let c = m.create_var("c", Type::Int);
    let body = Stmt::assign(tok(":="), lhs(&c), int(1));
    m.set_statement_sequence(Stmt::if_(tok("if"), var(&b), Some(body), None));

    let cb = m.lower();
    assert_eq!(
        cb.to_string(),
        "    if b = 1 goto l1\n\
         \x20   goto l2\n\
         l1:\n\
         \x20   c <- 1\n\
         l2:\n"
    );
}

#[test]
fn not_swaps_the_branch_labels() {
    let mut m = module();
    let b = m.create_var("b", Type::Bool);
    let c = m.create_var("c", Type::Bool);
    let rhs = Expr::Unary(UnaryOp::new(tok("not"), UnOp::Not, var(&c)));
    m.set_statement_sequence(Stmt::assign(tok(":="), lhs(&b), rhs));

    let cb = m.lower();
    // c = 1 jumps to the 0-assignment: the labels are swapped
    assert_eq!(
        cb.to_string(),
        "    if c = 1 goto l2\n\
         \x20   t0 <- 1\n\
         \x20   goto l3\n\
         l2:\n\
         \x20   t0 <- 0\n\
         l3:\n\
         \x20   b <- t0\n"
    );
}

#[test]
fn call_statement_pushes_arguments_in_reverse() {
    let mut m = module();
    let q = Symbol::proc(
        "q",
        Type::Null,
        vec![Symbol::param("a", Type::Int), Symbol::param("b", Type::Int)],
    );
    m.symtab().borrow_mut().add(Rc::clone(&q));
    let mut call = FunctionCall::new(tok("q"), q);
    call.add_arg(int(1));
    call.add_arg(int(2));
    m.set_statement_sequence(Stmt::call(tok("q"), call));

    let cb = m.lower();
    assert_eq!(
        cb.to_string(),
        "    param 1 <- 2\n\
         \x20   param 0 <- 1\n\
         \x20   call q\n"
    );
}

#[test]
fn function_result_lands_in_a_temporary() {
    let mut m = module();
    let x = m.create_var("x", Type::Int);
    let f = Symbol::proc("f", Type::Int, vec![]);
    m.symtab().borrow_mut().add(Rc::clone(&f));
    let rhs = Expr::Call(FunctionCall::new(tok("f"), f));
    m.set_statement_sequence(Stmt::assign(tok(":="), lhs(&x), rhs));

    let cb = m.lower();
    assert_eq!(
        cb.to_string(),
        "    t0 <- call f\n\
         \x20   x <- t0\n"
    );
}

#[test]
fn return_lowering_in_a_function() {
    let mut m = module();
    let f_sym = Symbol::proc("f", Type::Int, vec![]);
    m.symtab().borrow_mut().add(Rc::clone(&f_sym));
    let f = m.add_procedure(tok("function"), "f", f_sym);
    let x = f.create_var("x", Type::Int);
    let ret = Stmt::ret(tok("return"), f, Some(binary(BinOp::Add, var(&x), int(1))));
    f.set_statement_sequence(ret);

    let cb = m.children()[0].lower();
    assert_eq!(
        cb.to_string(),
        "    t0 <- x + 1\n\
         \x20   return t0\n"
    );
}

#[test]
fn matrix_store_computes_the_flattened_offset() {
    let mut m = module();
    with_runtime_helpers(&m);
    let a = m.create_var("a", Type::array(3, Type::array(4, Type::Int)));
    let i = m.create_var("i", Type::Int);
    let j = m.create_var("j", Type::Int);

    // a[i,j] := 0
    let mut dsg = ArrayDesignator::new(tok("a"), Rc::clone(&a));
    dsg.add_index(var(&i));
    dsg.add_index(var(&j));
    dsg.indices_complete();
    m.set_statement_sequence(Stmt::assign(tok(":="), Designator::Array(dsg), int(0)));

    let cb = m.lower();
    assert_label_integrity(&cb);
    // ((i * DIM(&a,2)) + j) * 4 + DOFS(&a), added to the array pointer
    assert_eq!(
        cb.to_string(),
        "    t0 <- &a\n\
         \x20   param 1 <- 2\n\
         \x20   t2 <- &a\n\
         \x20   param 0 <- t2\n\
         \x20   t1 <- call DIM\n\
         \x20   t3 <- i * t1\n\
         \x20   t4 <- t3 + j\n\
         \x20   t5 <- t4 * 4\n\
         \x20   t7 <- &a\n\
         \x20   param 0 <- t7\n\
         \x20   t6 <- call DOFS\n\
         \x20   t8 <- t5 + t6\n\
         \x20   t9 <- t0 + t8\n\
         \x20   @t9 <- 0\n"
    );

    // the store goes through a reference that remembers the array symbol
    let last = cb.instrs().last().unwrap();
    match last {
        Instr::Assign {
            dest: TacAddr::Reference { base, sym },
            ..
        } => {
            assert_eq!(base.name(), "t9");
            assert_eq!(sym.name(), "a");
        }
        other => panic!("expected a reference store, got {other}"),
    }
}

#[test]
fn pointer_to_array_element_reads_skip_the_address_of() {
    let m = module();
    with_runtime_helpers(&m);
    let a = m.create_var("a", Type::pointer_to(Type::array(3, Type::Int)));

    let mut dsg = ArrayDesignator::new(tok("a"), Rc::clone(&a));
    dsg.add_index(int(2));
    dsg.indices_complete();

    let mut cb = CodeBlock::new(Rc::clone(m.symtab()));
    let addr = Expr::Designator(Designator::Array(dsg)).to_tac(&mut cb);

    // the pointer is used directly: no address-of over `a` anywhere
    assert!(cb
        .instrs()
        .iter()
        .all(|i| !matches!(i, Instr::Address { .. })));
    assert!(matches!(addr, TacAddr::Reference { .. }));
}

#[test]
fn missing_indices_are_padded_with_zero() {
    let m = module();
    with_runtime_helpers(&m);
    let a = m.create_var("a", Type::array(3, Type::Int));

    let mut dsg = ArrayDesignator::new(tok("a"), Rc::clone(&a));
    dsg.indices_complete();

    let mut cb = CodeBlock::new(Rc::clone(m.symtab()));
    let addr = Expr::Designator(Designator::Array(dsg)).to_tac(&mut cb);

    assert!(matches!(addr, TacAddr::Reference { .. }));
    assert_eq!(
        cb.to_string(),
        "    t0 <- &a\n\
         \x20   t1 <- 0 * 4\n\
         \x20   t3 <- &a\n\
         \x20   param 0 <- t3\n\
         \x20   t2 <- call DOFS\n\
         \x20   t4 <- t1 + t2\n\
         \x20   t5 <- t0 + t4\n"
    );
}

#[test]
fn unary_plus_is_transparent() {
    let mut m = module();
    let x = m.create_var("x", Type::Int);
    let y = m.create_var("y", Type::Int);
    let rhs = Expr::Unary(UnaryOp::new(tok("+"), UnOp::Pos, var(&y)));
    m.set_statement_sequence(Stmt::assign(tok(":="), lhs(&x), rhs));

    let cb = m.lower();
    assert_eq!(cb.to_string(), "    x <- y\n");
}

#[test]
fn negation_goes_through_a_temporary() {
    let mut m = module();
    let x = m.create_var("x", Type::Int);
    let rhs = Expr::Unary(UnaryOp::new(tok("-"), UnOp::Neg, var(&x)));
    m.set_statement_sequence(Stmt::assign(tok(":="), lhs(&x), rhs));

    let cb = m.lower();
    assert_eq!(
        cb.to_string(),
        "    t0 <- neg x\n\
         \x20   x <- t0\n"
    );
}
