//! The runtime registry shared by every [`Program`](crate::Program).

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use wasmlink_core::{Symbol, SymbolTable};
use wasmlink_module::{Module, ModuleKind};

/// Trait for fetching the bytes of modules that are loaded as dependencies.
pub trait ModuleReader: core::fmt::Debug + Send {
    /// Reads the contents of the module with the given file name.
    ///
    /// # Errors
    ///
    /// Returns an error if the module could not be found or read.
    fn read(&self, name: &str) -> std::io::Result<Vec<u8>>;

    /// Releases the bytes returned by [`ModuleReader::read()`], once the module is loaded.
    fn release(&self, bytes: Vec<u8>) {
        drop(bytes)
    }
}

/// A [`ModuleReader`] that searches a list of directories.
#[derive(Clone, Debug, Default)]
pub struct DirectoryReader {
    directories: Vec<PathBuf>,
}

impl DirectoryReader {
    /// Creates a reader searching the given directories, in order.
    pub fn new(directories: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            directories: directories.into_iter().map(Into::into).collect(),
        }
    }
}

impl ModuleReader for DirectoryReader {
    fn read(&self, name: &str) -> std::io::Result<Vec<u8>> {
        for directory in self.directories.iter() {
            match std::fs::read(directory.join(name)) {
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => continue,
                result => return result,
            }
        }

        Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("module {name:?} was not found"),
        ))
    }
}

/// A [`ModuleReader`] that returns modules stored in memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryReader {
    modules: HashMap<String, Vec<u8>>,
}

impl MemoryReader {
    #[allow(missing_docs)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a module with the given file name.
    pub fn with_module(mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(name, bytes);
        self
    }

    /// Adds a module with the given file name.
    pub fn insert(&mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.modules.insert(name.into(), bytes.into());
    }
}

impl ModuleReader for MemoryReader {
    fn read(&self, name: &str) -> std::io::Result<Vec<u8>> {
        self.modules.get(name).cloned().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("module {name:?} was not found"),
            )
        })
    }
}

/// Trait for turning the bytes of a module into a [`Module`].
pub trait ModuleLoader: core::fmt::Debug + Send {
    /// Parses a module of the given kind.
    ///
    /// # Errors
    ///
    /// Returns an error if the module is malformed.
    fn load(
        &self,
        bytes: &[u8],
        kind: ModuleKind,
        symbols: &mut SymbolTable,
    ) -> anyhow::Result<Module>;
}

/// A [`ModuleLoader`] that decodes WebAssembly binaries with [`wasmlink_module::decode()`].
///
/// Both kinds of modules are expected to be in the WebAssembly binary format, as only their
/// linking metadata is used.
#[derive(Clone, Copy, Debug, Default)]
pub struct WasmLoader;

impl ModuleLoader for WasmLoader {
    fn load(
        &self,
        bytes: &[u8],
        kind: ModuleKind,
        symbols: &mut SymbolTable,
    ) -> anyhow::Result<Module> {
        wasmlink_module::decode(bytes, kind, symbols)
    }
}

/// Configures a [`Runtime`].
#[derive(Clone, Copy, Debug, Default)]
#[non_exhaustive]
pub struct RuntimeConfig {
    /// Set if the runtime is used by a standalone program rather than embedded in a host.
    ///
    /// A standalone runtime never reads dependencies: only modules that are already registered
    /// can be linked, and the modules needed by a root module are not loaded.
    pub standalone: bool,
    /// Set to replace a `.wasm` extension with `.aot` (and vice versa) when a dependency is loaded
    /// for a module of the other kind.
    pub auto_update_extension: bool,
}

impl RuntimeConfig {
    #[allow(missing_docs)]
    pub fn with_standalone(mut self, standalone: bool) -> Self {
        self.standalone = standalone;
        self
    }

    #[allow(missing_docs)]
    pub fn with_auto_update_extension(mut self, auto_update_extension: bool) -> Self {
        self.auto_update_extension = auto_update_extension;
        self
    }
}

/// Holds the symbol table and every module loaded by the [`Program`](crate::Program)s using it.
///
/// Modules are never unloaded while the runtime is alive.
#[derive(Debug)]
pub struct Runtime {
    config: RuntimeConfig,
    symbols: SymbolTable,
    modules: BTreeMap<Symbol, Arc<Module>>,
    reader: Option<Box<dyn ModuleReader>>,
    loader: Box<dyn ModuleLoader>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl Runtime {
    /// Creates a runtime, interning the [well-known symbols](wasmlink_core::symbol::well_known).
    pub fn new(config: RuntimeConfig) -> Self {
        log::debug!("runtime created (standalone = {})", config.standalone);
        Self {
            config,
            symbols: SymbolTable::new(),
            modules: BTreeMap::new(),
            reader: None,
            loader: Box::new(WasmLoader),
        }
    }

    #[allow(missing_docs)]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    #[allow(missing_docs)]
    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    #[allow(missing_docs)]
    pub fn symbols_mut(&mut self) -> &mut SymbolTable {
        &mut self.symbols
    }

    /// Sets the reader used to fetch dependencies, replacing any previous reader.
    pub fn register_module_reader(&mut self, reader: Box<dyn ModuleReader>) {
        self.reader = Some(reader);
    }

    /// Sets the loader used to parse dependencies.
    pub fn set_module_loader(&mut self, loader: Box<dyn ModuleLoader>) {
        self.loader = loader;
    }

    pub(crate) fn reader(&self) -> Option<&dyn ModuleReader> {
        self.reader.as_deref()
    }

    /// Decodes a module with the runtime's [`ModuleLoader`].
    ///
    /// # Errors
    ///
    /// Returns an error if the module is malformed.
    pub fn parse_module(&mut self, bytes: &[u8], kind: ModuleKind) -> anyhow::Result<Module> {
        self.loader.load(bytes, kind, &mut self.symbols)
    }

    /// Names a module and registers it, returning the registered module.
    ///
    /// If a module with the same name was already registered, it is returned instead.
    pub fn register_module(&mut self, name: Symbol, module: Module) -> Arc<Module> {
        if let Some(existing) = self.modules.get(&name) {
            return existing.clone();
        }

        log::debug!("registered module {:?}", self.symbols.resolve(name));
        let module = Arc::new(module.with_name(name));
        self.modules.insert(name, module.clone());
        module
    }

    /// Finds a module that was previously loaded.
    pub fn find_module_by_name(&self, name: Symbol) -> Option<Arc<Module>> {
        self.modules.get(&name).cloned()
    }

    /// The number of registered modules.
    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// Changes the extension of a module's file `name` to the one used by modules of the given
    /// `kind`, if [`RuntimeConfig::auto_update_extension`] is set.
    pub fn upgrade_extension<'a>(
        &self,
        name: &'a str,
        kind: ModuleKind,
    ) -> std::borrow::Cow<'a, str> {
        use std::borrow::Cow;

        if !self.config.auto_update_extension {
            return Cow::Borrowed(name);
        }

        let other = match kind {
            ModuleKind::Bytecode => ModuleKind::Native,
            ModuleKind::Native => ModuleKind::Bytecode,
        };

        match name
            .strip_suffix(other.extension())
            .and_then(|stem| stem.strip_suffix('.'))
        {
            Some(stem) => Cow::Owned(format!("{stem}.{}", kind.extension())),
            None => Cow::Borrowed(name),
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        log::debug!(
            "runtime destroyed with {} modules and {} symbols",
            self.modules.len(),
            self.symbols.len()
        );
    }
}
