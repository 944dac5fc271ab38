//! Module registry and contract.
//!
//! The module set is a fixed, known list; there is no plugin discovery.
//! A module is a callable taking the fire collection, mutating fire
//! records and appending a processing-log entry. Callers may register
//! additional modules (the scientific calculators are consumed this way,
//! as black boxes), declaring whether each is export-kind; export modules
//! are the only ones still run after an earlier module has failed.

use crate::error::{Result, SmokeError};
use crate::fires::manager::FiresManager;

pub const CORE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    Standard,
    /// Still executed after a pipeline failure, so output is always
    /// produced.
    Export,
}

type ModuleFn = Box<dyn Fn(&mut FiresManager) -> Result<()>>;

pub struct Module {
    name: String,
    kind: ModuleKind,
    version: String,
    func: ModuleFn,
}

impl Module {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ModuleKind {
        self.kind
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn run(&self, fires_manager: &mut FiresManager) -> Result<()> {
        (self.func)(fires_manager)
    }
}

pub struct ModuleRegistry {
    modules: Vec<Module>,
}

impl ModuleRegistry {
    /// An empty registry; useful for tests and fully caller-defined runs.
    pub fn new() -> Self {
        ModuleRegistry {
            modules: Vec::new(),
        }
    }

    /// The built-in module set: `filter`, `merge`, `dispersion`, `export`.
    pub fn with_builtins() -> Self {
        let mut registry = ModuleRegistry::new();
        registry.register(
            "filter",
            ModuleKind::Standard,
            CORE_VERSION,
            crate::fires::filter::run_module,
        );
        registry.register(
            "merge",
            ModuleKind::Standard,
            CORE_VERSION,
            crate::merge::by_id::run_module,
        );
        registry.register(
            "dispersion",
            ModuleKind::Standard,
            CORE_VERSION,
            crate::disperse::run_module,
        );
        registry.register("export", ModuleKind::Export, CORE_VERSION, |fires_manager| {
            // export mechanics (files, email, upload) live outside the
            // core; the builtin only records that the stage ran
            fires_manager.processed("export", CORE_VERSION, None);
            Ok(())
        });
        registry
    }

    /// Registers a module, replacing any existing one with the same name.
    pub fn register<F>(&mut self, name: &str, kind: ModuleKind, version: &str, func: F)
    where
        F: Fn(&mut FiresManager) -> Result<()> + 'static,
    {
        self.modules.retain(|m| m.name != name);
        self.modules.push(Module {
            name: name.to_string(),
            kind,
            version: version.to_string(),
            func: Box::new(func),
        });
    }

    pub fn resolve(&self, name: &str) -> Result<&Module> {
        self.modules
            .iter()
            .find(|m| m.name == name)
            .ok_or_else(|| SmokeError::InvalidModule(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.name.as_str()).collect()
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        ModuleRegistry::with_builtins()
    }
}
