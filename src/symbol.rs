use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::types::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Global,
    Local,
    Param,
    Proc,
}

/// A named entity: a variable, a parameter, or a procedure.
///
/// Symbols are shared via `Rc`: the symbol table owns them in spirit, AST
/// nodes and TAC operands hold cheap handles. For a procedure the `ty` field
/// is the declared return type (`Type::Null` for a procedure proper) and
/// `params` lists the formal parameters in declaration order.
#[derive(Debug)]
pub struct Symbol {
    name: String,
    kind: SymbolKind,
    ty: Type,
    params: Vec<Rc<Symbol>>,
    data: RefCell<Option<String>>,
}

impl Symbol {
    pub fn global(name: impl Into<String>, ty: Type) -> Rc<Self> {
        Self::new(name, SymbolKind::Global, ty)
    }

    pub fn local(name: impl Into<String>, ty: Type) -> Rc<Self> {
        Self::new(name, SymbolKind::Local, ty)
    }

    pub fn param(name: impl Into<String>, ty: Type) -> Rc<Self> {
        Self::new(name, SymbolKind::Param, ty)
    }

    pub fn proc(name: impl Into<String>, ret_ty: Type, params: Vec<Rc<Symbol>>) -> Rc<Self> {
        Rc::new(Self {
            name: name.into(),
            kind: SymbolKind::Proc,
            ty: ret_ty,
            params,
            data: RefCell::new(None),
        })
    }

    fn new(name: impl Into<String>, kind: SymbolKind, ty: Type) -> Rc<Self> {
        Rc::new(Self {
            name: name.into(),
            kind,
            ty,
            params: Vec::new(),
            data: RefCell::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SymbolKind {
        self.kind
    }

    pub fn ty(&self) -> &Type {
        &self.ty
    }

    pub fn n_params(&self) -> usize {
        self.params.len()
    }

    pub fn param_at(&self, i: usize) -> &Rc<Symbol> {
        &self.params[i]
    }

    /// Bind a character-data initializer. Only meaningful for globals.
    pub fn set_data(&self, data: String) {
        *self.data.borrow_mut() = Some(data);
    }

    pub fn data(&self) -> Option<String> {
        self.data.borrow().clone()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A symbol table chained to the table of the enclosing scope.
///
/// Insertion order is preserved so dumps and iteration are deterministic.
#[derive(Debug, Default)]
pub struct SymbolTable {
    parent: Option<Rc<RefCell<SymbolTable>>>,
    symbols: IndexMap<String, Rc<Symbol>>,
}

impl SymbolTable {
    /// A parentless table, for a module scope.
    pub fn root() -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self::default()))
    }

    /// A table chained to `parent`, for a procedure scope.
    pub fn child_of(parent: &Rc<RefCell<SymbolTable>>) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            parent: Some(Rc::clone(parent)),
            symbols: IndexMap::new(),
        }))
    }

    /// Register a symbol. Returns false if the name is already taken in this
    /// table (the existing entry wins).
    pub fn add(&mut self, symbol: Rc<Symbol>) -> bool {
        if self.symbols.contains_key(symbol.name()) {
            return false;
        }
        self.symbols.insert(symbol.name().to_string(), symbol);
        true
    }

    /// Look a name up here, then along the parent chain.
    pub fn find(&self, name: &str) -> Option<Rc<Symbol>> {
        if let Some(sym) = self.symbols.get(name) {
            return Some(Rc::clone(sym));
        }
        self.parent.as_ref().and_then(|p| p.borrow().find(name))
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Rc<Symbol>> {
        self.symbols.values()
    }
}
