use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;

/// An interned name. Encodes into a [`Value`](crate::Value) as an immediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

impl Symbol {
    #[inline(always)]
    pub const fn from_id(id: u32) -> Self {
        Self(id)
    }

    #[inline(always)]
    pub const fn id(self) -> u32 {
        self.0
    }
}

struct SymbolsImpl {
    names: Vec<Arc<str>>,
    ids: HashMap<Arc<str>, Symbol, ahash::RandomState>,
}

impl SymbolsImpl {
    fn get_or_add(&mut self, name: &str) -> Symbol {
        if let Some(&symbol) = self.ids.get(name) {
            return symbol;
        }
        let symbol = Symbol(self.names.len() as u32);
        let interned = Arc::<str>::from(name);
        self.names.push(interned.clone());
        self.ids.insert(interned, symbol);
        symbol
    }
}

/// Process-wide symbol table. Ids are dense and never reused.
pub struct Symbols(RwLock<SymbolsImpl>);

impl Symbols {
    pub fn new() -> Self {
        Self(RwLock::new(SymbolsImpl {
            names: Vec::new(),
            ids: HashMap::default(),
        }))
    }

    pub fn intern(&self, name: &str) -> Symbol {
        if let Some(&symbol) = self.0.read().ids.get(name) {
            return symbol;
        }
        self.0.write().get_or_add(name)
    }

    pub fn lookup(&self, name: &str) -> Option<Symbol> {
        self.0.read().ids.get(name).copied()
    }

    pub fn name(&self, symbol: Symbol) -> Option<Arc<str>> {
        self.0.read().names.get(symbol.0 as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.0.read().names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Symbols {
    fn default() -> Self {
        Self::new()
    }
}
