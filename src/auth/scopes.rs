//! Scope policy registry: per-method required scopes, merged from every
//! registered service module.

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

/// Set of acceptable scopes for one method. Presenting any one is sufficient.
pub type ScopeSet = BTreeSet<String>;

/// Build a [`ScopeSet`] from string literals.
#[must_use]
pub fn scope_set<I, S>(scopes: I) -> ScopeSet
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    scopes.into_iter().map(Into::into).collect()
}

/// One module's declaration: fully-qualified method name -> scopes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeDeclaration {
    /// Declaring module, used in conflict reports.
    pub module: String,
    /// Method table.
    pub methods: BTreeMap<String, ScopeSet>,
}

impl ScopeDeclaration {
    /// Start an empty declaration for `module`.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            methods: BTreeMap::new(),
        }
    }

    /// Declare `method` as requiring any of `scopes`.
    #[must_use]
    pub fn method<I, S>(mut self, method: impl Into<String>, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.methods.insert(method.into(), scope_set(scopes));
        self
    }
}

/// Two modules declared the same method with different scope sets.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "conflicting scope declarations for {method}: {first_module} requires {first:?}, {second_module} requires {second:?}"
)]
pub struct PolicyConflictError {
    /// Method declared twice.
    pub method: String,
    /// Module whose declaration was merged first.
    pub first_module: String,
    /// Its scopes.
    pub first: ScopeSet,
    /// Module that conflicted.
    pub second_module: String,
    /// Its scopes.
    pub second: ScopeSet,
}

#[derive(Debug, Clone)]
struct Entry {
    module: String,
    scopes: ScopeSet,
}

/// Unified, immutable method -> scopes table.
///
/// Undeclared methods have no entry and are denied by the authorizer. A method
/// declared with an empty scope set can never be satisfied.
#[derive(Debug, Clone, Default)]
pub struct ScopePolicyRegistry {
    table: BTreeMap<String, Entry>,
}

impl ScopePolicyRegistry {
    /// Merge module declarations into one table.
    ///
    /// Identical duplicate declarations are accepted; differing ones fail. The
    /// result does not depend on the order of `declarations`.
    pub fn merge(
        declarations: impl IntoIterator<Item = ScopeDeclaration>,
    ) -> Result<Self, PolicyConflictError> {
        let mut table: BTreeMap<String, Entry> = BTreeMap::new();
        for declaration in declarations {
            for (method, scopes) in declaration.methods {
                if scopes.is_empty() {
                    warn!(
                        module = %declaration.module,
                        method = %method,
                        "Method declared with no scopes; every call to it will be denied"
                    );
                }
                match table.get(&method) {
                    Some(existing) if existing.scopes != scopes => {
                        return Err(PolicyConflictError {
                            method,
                            first_module: existing.module.clone(),
                            first: existing.scopes.clone(),
                            second_module: declaration.module.clone(),
                            second: scopes,
                        });
                    }
                    Some(_) => {}
                    None => {
                        table.insert(
                            method,
                            Entry {
                                module: declaration.module.clone(),
                                scopes,
                            },
                        );
                    }
                }
            }
        }
        Ok(Self { table })
    }

    /// Scopes accepted for `method`, or `None` if no module declared it.
    #[must_use]
    pub fn required_scopes(&self, method: &str) -> Option<&ScopeSet> {
        self.table.get(method).map(|e| &e.scopes)
    }

    /// Module that declared `method`.
    #[must_use]
    pub fn declaring_module(&self, method: &str) -> Option<&str> {
        self.table.get(method).map(|e| e.module.as_str())
    }

    /// All declared methods with their scopes, sorted by method name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ScopeSet)> {
        self.table.iter().map(|(m, e)| (m.as_str(), &e.scopes))
    }

    /// Number of declared methods.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether nothing was declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
