//! Interning of module, import and export names.
//!
//! Every name used while linking is interned exactly once in a [`SymbolTable`], and is referred to
//! by a [`Symbol`] handle afterwards. Two symbols from the same table are equal if and only if
//! their contents are equal, so names are never compared by content outside of this module.

use crate::LinkError;

/// A handle to a name interned in a [`SymbolTable`].
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct Symbol(u32);

impl Symbol {
    /// Gets the index of the symbol within its [`SymbolTable`].
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Symbols that are interned by every [`SymbolTable`] when it is created.
///
/// The well-known symbols occupy the first [`COUNT`](well_known::COUNT) indices of every table,
/// in the order given by [`names()`](well_known::names).
pub mod well_known {
    use super::Symbol;

    macro_rules! well_known_symbols {
        ($($name:ident = $text:literal,)*) => {
            well_known_symbols!(@consts 0u32, $($name = $text,)*);

            const RUNTIME_NAMES: &[&str] = &[$($text),*];
        };
        (@consts $index:expr, $name:ident = $text:literal, $($rest:tt)*) => {
            #[allow(missing_docs)]
            pub const $name: Symbol = Symbol($index);

            well_known_symbols!(@consts $index + 1, $($rest)*);
        };
        (@consts $index:expr,) => {};
    }

    well_known_symbols! {
        ENV = "env",
        GOT_MEM = "GOT.mem",
        GOT_FUNC = "GOT.func",
        STACK_POINTER = "__stack_pointer",
        USER_STACK_POINTER = "__user_stack_pointer",
        MEMORY_BASE = "__memory_base",
        TABLE_BASE = "__table_base",
        AS_ALLOC = "__alloc",
        AS_FREE = "__free",
        AS_REALLOC = "__realloc",
    }

    /// Names of the functions provided by the builtin libc pseudo-module, in the order their
    /// native entry points are registered.
    pub const LIBC_NAMES: &[&str] = &[
        "malloc",
        "free",
        "realloc",
        "calloc",
        "printf",
        "sprintf",
        "snprintf",
        "puts",
        "putchar",
        "memcmp",
        "memcpy",
        "memmove",
        "memset",
        "memchr",
        "strchr",
        "strcmp",
        "strcpy",
        "strlen",
        "strncmp",
        "strncpy",
        "strdup",
        "strncasecmp",
        "strspn",
        "strcspn",
        "strstr",
        "strtol",
        "strtoul",
        "atoi",
        "bsearch",
        "exit",
        "abort",
        "isupper",
        "isalpha",
        "isspace",
        "isgraph",
        "isprint",
        "isdigit",
        "isxdigit",
        "isalnum",
        "tolower",
        "toupper",
        "dlopen",
        "dlsym",
        "dlclose",
    ];

    /// Index of the first builtin libc function among the well-known symbols.
    pub const LIBC_START: usize = RUNTIME_NAMES.len();

    /// The number of well-known symbols.
    pub const COUNT: usize = LIBC_START + LIBC_NAMES.len();

    /// The `malloc` function.
    pub const MALLOC: Symbol = libc(0);
    /// The `free` function.
    pub const FREE: Symbol = libc(1);
    /// The `realloc` function.
    pub const REALLOC: Symbol = libc(2);

    const fn libc(index: usize) -> Symbol {
        #[allow(clippy::cast_possible_truncation)]
        Symbol((LIBC_START + index) as u32)
    }

    /// Iterates over the names of all well-known symbols, in order.
    pub fn names() -> impl Iterator<Item = &'static str> + Clone {
        RUNTIME_NAMES.iter().chain(LIBC_NAMES).copied()
    }

    /// Returns `true` if `symbol` is one of the memory management routines `malloc`, `free` or
    /// `realloc`.
    pub fn is_memop(symbol: Symbol) -> bool {
        matches!(symbol, MALLOC | FREE | REALLOC)
    }

    /// Gets the AssemblyScript name of a memory management routine.
    pub fn assemblyscript_alias(symbol: Symbol) -> Option<Symbol> {
        match symbol {
            MALLOC => Some(AS_ALLOC),
            FREE => Some(AS_FREE),
            REALLOC => Some(AS_REALLOC),
            _ => None,
        }
    }
}

/// An append-only table of interned names.
#[derive(Clone, Debug)]
pub struct SymbolTable {
    names: indexmap::IndexSet<Box<str>>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    /// Creates a table containing only the [well-known symbols](well_known).
    pub fn new() -> Self {
        let mut names = indexmap::IndexSet::with_capacity(well_known::COUNT * 2);
        for name in well_known::names() {
            names.insert(Box::from(name));
        }

        debug_assert_eq!(names.len(), well_known::COUNT);
        Self { names }
    }

    fn symbol_at(index: usize) -> Symbol {
        Symbol(u32::try_from(index).unwrap_or(u32::MAX))
    }

    /// Interns a name that is already known to be valid UTF-8.
    pub fn intern_str(&mut self, name: &str) -> Symbol {
        if let Some(index) = self.names.get_index_of(name) {
            return Self::symbol_at(index);
        }

        let (index, _) = self.names.insert_full(Box::from(name));
        Self::symbol_at(index)
    }

    /// Interns a name, returning the existing [`Symbol`] if the name was already interned.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::InvalidEncoding`] if `name` is not valid UTF-8, in which case nothing
    /// is interned.
    pub fn intern(&mut self, name: &[u8]) -> Result<Symbol, LinkError> {
        let name = core::str::from_utf8(name).map_err(|_| LinkError::InvalidEncoding)?;
        Ok(self.intern_str(name))
    }

    /// Interns a file name with its final extension removed, so that `"libfoo.wasm"` and
    /// `"libfoo.aot"` both refer to `"libfoo"`.
    ///
    /// A name whose only `.` is its first character is interned as is.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::InvalidEncoding`] if `name` is not valid UTF-8.
    pub fn intern_filename_without_extension(&mut self, name: &[u8]) -> Result<Symbol, LinkError> {
        let name = core::str::from_utf8(name).map_err(|_| LinkError::InvalidEncoding)?;
        Ok(self.intern_str(strip_extension(name)))
    }

    /// Looks up a name without interning it.
    pub fn get(&self, name: &str) -> Option<Symbol> {
        self.names.get_index_of(name).map(Self::symbol_at)
    }

    /// Gets the contents of a symbol.
    ///
    /// # Panics
    ///
    /// Panics if the `symbol` did not originate from this table.
    pub fn resolve(&self, symbol: Symbol) -> &str {
        &self.names[symbol.index()]
    }

    /// The number of interned names, including the well-known symbols.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns `true` if only the well-known symbols are interned.
    pub fn is_empty(&self) -> bool {
        self.names.len() <= well_known::COUNT
    }

    /// Returns `true` if `symbol` is one of the [well-known symbols](well_known).
    pub fn is_well_known(&self, symbol: Symbol) -> bool {
        symbol.index() < well_known::COUNT
    }

    /// Gets the position of a [well-known symbol](well_known) among
    /// [`names()`](well_known::names).
    pub fn well_known_id(&self, symbol: Symbol) -> Option<usize> {
        Some(symbol.index()).filter(|_| self.is_well_known(symbol))
    }

    /// Gets the index of a builtin libc function within [`LIBC_NAMES`](well_known::LIBC_NAMES).
    pub fn libc_id(&self, symbol: Symbol) -> Option<usize> {
        self.well_known_id(symbol)
            .and_then(|id| id.checked_sub(well_known::LIBC_START))
    }
}

/// Removes the final extension from a file name.
pub fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(0) | None => name,
        Some(dot) => &name[..dot],
    }
}
