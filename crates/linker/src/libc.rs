//! The builtin libc pseudo-module, which supplies memory management and other C library
//! functions to every module instance in a [`Program`](crate::Program).
//!
//! Functions are bound lazily: a binding is created the first time a module refers to the
//! function, and the slot of the builtin libc region given to that binding is stable for the
//! lifetime of the program.

use std::collections::HashMap;
use wasmlink_core::{table_space, FuncType, LinkError, Symbol, SymbolTable};

/// A function provided by the embedder's C library implementation.
#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub struct NativeSymbol {
    #[allow(missing_docs)]
    pub name: &'static str,
    /// The function's signature, as accepted by [`FuncType::from_signature()`].
    pub signature: &'static str,
}

macro_rules! natives {
    ($($name:literal => $signature:literal,)*) => {
        /// The functions of the builtin libc pseudo-module, in the same order as
        /// [`LIBC_NAMES`](wasmlink_core::symbol::well_known::LIBC_NAMES).
        pub const NATIVES: &[NativeSymbol] = &[
            $(NativeSymbol { name: $name, signature: $signature }),*
        ];
    };
}

natives! {
    "malloc" => "(i)i",
    "free" => "(*)",
    "realloc" => "(*i)i",
    "calloc" => "(ii)i",
    "printf" => "($*)i",
    "sprintf" => "($$*)i",
    "snprintf" => "(*~$*)i",
    "puts" => "($)i",
    "putchar" => "(i)i",
    "memcmp" => "(**~)i",
    "memcpy" => "(**~)i",
    "memmove" => "(**~)i",
    "memset" => "(*ii)i",
    "memchr" => "(*ii)i",
    "strchr" => "($i)i",
    "strcmp" => "($$)i",
    "strcpy" => "(*$)i",
    "strlen" => "($)i",
    "strncmp" => "(**~)i",
    "strncpy" => "(**~)i",
    "strdup" => "($)i",
    "strncasecmp" => "($$i)i",
    "strspn" => "($$)i",
    "strcspn" => "($$)i",
    "strstr" => "($$)i",
    "strtol" => "($*i)i",
    "strtoul" => "($*i)i",
    "atoi" => "($)i",
    "bsearch" => "(***~i)i",
    "exit" => "(i)",
    "abort" => "(i)",
    "isupper" => "(i)i",
    "isalpha" => "(i)i",
    "isspace" => "(i)i",
    "isgraph" => "(i)i",
    "isprint" => "(i)i",
    "isdigit" => "(i)i",
    "isxdigit" => "(i)i",
    "isalnum" => "(i)i",
    "tolower" => "(i)i",
    "toupper" => "(i)i",
    "dlopen" => "($i)i",
    "dlsym" => "(i$)i",
    "dlclose" => "(i)i",
}

/// The number of bindings the binding list grows by at a time.
pub const ALLOC_STEP: usize = 4;

/// A builtin libc function that a module instance refers to.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct LibcBinding {
    /// The name of the function.
    pub name: Symbol,
    #[allow(missing_docs)]
    pub native: &'static NativeSymbol,
    /// The type of the function, known once the binding is first called or linked.
    pub ty: Option<FuncType>,
}

/// The builtin libc functions bound within a [`Program`](crate::Program).
#[derive(Debug, Default)]
pub struct LibcBindings {
    bindings: Vec<LibcBinding>,
    lookup: HashMap<Symbol, u32>,
}

impl LibcBindings {
    /// Gets the index of the binding for a function, creating it if it does not exist yet.
    ///
    /// Returns `None` if `name` is not a builtin libc function.
    pub fn bind(&mut self, symbols: &SymbolTable, name: Symbol) -> Option<u32> {
        if let Some(index) = self.lookup.get(&name) {
            return Some(*index);
        }

        let native = NATIVES.get(symbols.libc_id(name)?)?;
        let index = u32::try_from(self.bindings.len()).ok()?;
        if index >= table_space::SLOT_SIZE {
            return None;
        }

        if self.bindings.len() == self.bindings.capacity() {
            self.bindings.reserve_exact(ALLOC_STEP);
        }

        log::trace!("bound builtin libc function {} to {index}", native.name);
        self.bindings.push(LibcBinding {
            name,
            native,
            ty: None,
        });
        self.lookup.insert(name, index);
        Some(index)
    }

    /// Gets the slot referring to a binding.
    pub fn slot(index: u32) -> u32 {
        table_space::BUILTIN_LIBC_REGION_START + index
    }

    #[allow(missing_docs)]
    pub fn get(&self, index: u32) -> Option<&LibcBinding> {
        self.bindings.get(index as usize)
    }

    /// Checks that a binding has the `expected` type, inferring its type from its signature if it
    /// has not been called before.
    pub(crate) fn check_type(
        &mut self,
        index: u32,
        expected: &FuncType,
        slot: u32,
    ) -> Result<(), LinkError> {
        let binding = self
            .bindings
            .get_mut(index as usize)
            .ok_or(LinkError::UndefinedElement { slot })?;

        if binding.ty.is_none() {
            let inferred = FuncType::from_signature(binding.native.signature)
                .ok_or(LinkError::IndirectCallTypeMismatch { slot })?;
            binding.ty = Some(inferred);
        }

        if binding.ty.as_ref() == Some(expected) {
            Ok(())
        } else {
            Err(LinkError::IndirectCallTypeMismatch { slot })
        }
    }

    /// The number of bound functions.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Returns `true` if no functions are bound.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// The number of bindings that can be stored before the list must grow.
    pub fn capacity(&self) -> usize {
        self.bindings.capacity()
    }
}

