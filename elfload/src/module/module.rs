use std::{collections::HashMap, fmt, str::FromStr, sync::Arc};

use anyhow::{bail, Result};

use super::{exec, mmap, open};
use crate::core::resolve::{Enhancers, PerfResolveModule};

/// Module identifiers.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub(crate) enum ModuleId {
    Exec,
    Mmap,
    Open,
}

impl ModuleId {
    /// Converts a ModuleId to a unique str identifier.
    pub fn to_str(self) -> &'static str {
        use ModuleId::*;
        match self {
            Exec => "exec",
            Mmap => "mmap",
            Open => "open",
        }
    }
}

impl FromStr for ModuleId {
    type Err = anyhow::Error;

    /// Constructs a ModuleId from a unique str identifier.
    fn from_str(val: &str) -> Result<Self> {
        use ModuleId::*;
        Ok(match val {
            "exec" => Exec,
            "mmap" => Mmap,
            "open" => Open,
            x => bail!("Can't construct a ModuleId from {}", x),
        })
    }
}

// Allow using ModuleId in log messages.
impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_str())
    }
}

/// All modules are registered there. The following is the main API and object
/// to manipulate them.
pub(crate) struct Modules {
    /// Set of registered modules we can use.
    modules: HashMap<ModuleId, PerfResolveModule>,
}

impl Modules {
    pub(crate) fn new() -> Modules {
        Modules {
            modules: HashMap::new(),
        }
    }

    /// Register a module.
    pub(crate) fn register(
        &mut self,
        id: ModuleId,
        module: PerfResolveModule,
    ) -> Result<&mut Self> {
        // Ensure uniqueness of the module name. This is important as their
        // name is used as a key.
        if self.modules.contains_key(&id) {
            bail!("Could not insert module '{}'; name already registered", id);
        }

        self.modules.insert(id, module);
        Ok(self)
    }

    /// Registered module identifiers, sorted.
    pub(crate) fn ids(&self) -> Vec<ModuleId> {
        let mut ids = self.modules.keys().copied().collect::<Vec<_>>();
        ids.sort();
        ids
    }

    /// Consume the registry, keeping the selected modules (all of them if no
    /// selection is given) and the essential ones. Modules are returned sorted
    /// by identifier.
    pub(crate) fn select(
        mut self,
        selection: Option<&[ModuleId]>,
    ) -> Result<Vec<(ModuleId, PerfResolveModule)>> {
        if let Some(selection) = selection {
            if let Some(id) = selection.iter().find(|id| !self.modules.contains_key(*id)) {
                bail!("Module {id} is not registered");
            }
        }

        let mut selected = Vec::new();
        for id in self.ids() {
            let Some(module) = self.modules.remove(&id) else {
                continue;
            };
            match selection {
                Some(selection)
                    if !selection.contains(&id) && !module.monitor().is_essential() =>
                {
                    continue
                }
                _ => selected.push((id, module)),
            }
        }
        Ok(selected)
    }
}

/// Build the catalogue of monitor modules.
pub(crate) fn get_modules(enhancers: &Arc<Enhancers>) -> Result<Modules> {
    let mut group = Modules::new();

    // Register all modules here.
    group
        .register(ModuleId::Exec, exec::module(Arc::clone(enhancers)))?
        .register(ModuleId::Mmap, mmap::module(Arc::clone(enhancers)))?
        .register(ModuleId::Open, open::module(Arc::clone(enhancers)))?;

    Ok(group)
}
