//! Capability tables: the host functions a program may call.
//!
//! A table is an explicit, enumerable set of named host functions. Privileged
//! setup code runs against an elevated table; afterwards every name that the
//! normal table does not contain is revoked. Revocation is a layer on top of the
//! entries, so a revoked name stays enumerable but every call is rejected.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::context::Context;
use super::value::Value;

/// Host function signature.
pub type HostFunction = Arc<dyn Fn(&Context, &[Value]) -> Result<Value, String> + Send + Sync>;

/// Capability call errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CapabilityError {
    #[error("Name {0} not declared.")]
    Unknown(String),

    #[error("{0} is not available in this context.")]
    Revoked(String),

    #[error("Expected {expected} arguments for {name}, but got {actual}.")]
    Arity {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("{0}")]
    Failed(String),
}

/// A named host function with a fixed arity.
#[derive(Clone)]
pub struct Capability {
    name: String,
    arity: usize,
    function: HostFunction,
}

impl std::fmt::Debug for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capability")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

impl Capability {
    pub fn new<F>(name: impl Into<String>, arity: usize, function: F) -> Self
    where
        F: Fn(&Context, &[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            arity,
            function: Arc::new(function),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn call(&self, context: &Context, args: &[Value]) -> Result<Value, CapabilityError> {
        if args.len() != self.arity {
            return Err(CapabilityError::Arity {
                name: self.name.clone(),
                expected: self.arity,
                actual: args.len(),
            });
        }
        (self.function)(context, args).map_err(CapabilityError::Failed)
    }
}

/// Enumerable set of capabilities with a revocation layer.
#[derive(Clone, Debug, Default)]
pub struct CapabilityTable {
    entries: BTreeMap<String, Capability>,
    revoked: BTreeSet<String>,
}

impl CapabilityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The capabilities every program may use.
    pub fn standard() -> Self {
        Self::new()
            .with(Capability::new("display", 1, |ctx, args| {
                ctx.push_output(args[0].to_string());
                Ok(args[0].clone())
            }))
            .with(Capability::new("error", 1, |_, args| {
                Err(format!("Error: {}", args[0]))
            }))
            .with(Capability::new("abs", 1, |_, args| {
                int_arg(args, 0, "abs").map(|n| Value::Int(n.wrapping_abs()))
            }))
            .with(Capability::new("max", 2, |_, args| {
                Ok(Value::Int(int_arg(args, 0, "max")?.max(int_arg(args, 1, "max")?)))
            }))
            .with(Capability::new("min", 2, |_, args| {
                Ok(Value::Int(int_arg(args, 0, "min")?.min(int_arg(args, 1, "min")?)))
            }))
    }

    pub fn with(mut self, capability: Capability) -> Self {
        self.insert(capability);
        self
    }

    pub fn insert(&mut self, capability: Capability) {
        self.revoked.remove(capability.name());
        self.entries.insert(capability.name.clone(), capability);
    }

    /// Union of both tables; entries of `other` win on name clashes.
    pub fn merged(&self, other: &CapabilityTable) -> CapabilityTable {
        let mut merged = self.clone();
        for capability in other.entries.values() {
            merged.insert(capability.clone());
        }
        merged.revoked.extend(other.revoked.iter().cloned());
        merged
    }

    /// Every entry name, revoked or not.
    pub fn names(&self) -> BTreeSet<String> {
        self.entries.keys().cloned().collect()
    }

    /// Names present here but absent from `other`.
    pub fn difference(&self, other: &CapabilityTable) -> BTreeSet<String> {
        self.entries
            .keys()
            .filter(|name| !other.entries.contains_key(*name))
            .cloned()
            .collect()
    }

    pub fn revoke<I>(&mut self, names: I)
    where
        I: IntoIterator<Item = String>,
    {
        for name in names {
            if self.entries.contains_key(&name) {
                self.revoked.insert(name);
            }
        }
    }

    pub fn revoked(&self) -> &BTreeSet<String> {
        &self.revoked
    }

    pub fn is_revoked(&self, name: &str) -> bool {
        self.revoked.contains(name)
    }

    /// Capabilities that can still be called, in name order.
    pub fn visible(&self) -> impl Iterator<Item = &Capability> {
        self.entries
            .values()
            .filter(|capability| !self.revoked.contains(capability.name()))
    }

    pub fn get(&self, name: &str) -> Result<&Capability, CapabilityError> {
        if self.revoked.contains(name) {
            return Err(CapabilityError::Revoked(name.to_string()));
        }
        self.entries
            .get(name)
            .ok_or_else(|| CapabilityError::Unknown(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn int_arg(args: &[Value], index: usize, name: &str) -> Result<i64, String> {
    args[index].as_int().ok_or_else(|| {
        format!(
            "{} expects a number, but got {}",
            name,
            args[index].type_name()
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn privileged() -> CapabilityTable {
        CapabilityTable::new().with(Capability::new("set_speed", 1, |_, args| Ok(args[0].clone())))
    }

    #[test]
    fn test_standard_display_writes_output() {
        let ctx = Context::new(CapabilityTable::standard());
        let display = ctx.capability("display").unwrap();
        let value = display.call(&ctx, &[Value::Int(3)]).unwrap();
        assert_eq!(value, Value::Int(3));
        assert_eq!(ctx.take_output(), vec!["3".to_string()]);
    }

    #[test]
    fn test_arity_checked() {
        let table = CapabilityTable::standard();
        let ctx = Context::new(table.clone());
        let err = table.get("max").unwrap().call(&ctx, &[Value::Int(1)]).unwrap_err();
        assert_eq!(
            err,
            CapabilityError::Arity {
                name: "max".into(),
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn test_difference_and_revoke() {
        let normal = CapabilityTable::standard();
        let mut elevated = normal.merged(&privileged());
        let extra = elevated.difference(&normal);
        assert_eq!(extra.into_iter().collect::<Vec<_>>(), vec!["set_speed".to_string()]);

        elevated.revoke(elevated.difference(&normal));
        assert!(elevated.is_revoked("set_speed"));
        assert!(matches!(
            elevated.get("set_speed"),
            Err(CapabilityError::Revoked(_))
        ));
        assert!(elevated.get("display").is_ok());
        assert!(elevated.names().contains("set_speed"));
        assert!(elevated.visible().all(|c| c.name() != "set_speed"));
    }

    #[test]
    fn test_revoke_ignores_unknown_names() {
        let mut table = CapabilityTable::standard();
        table.revoke(vec!["nope".to_string()]);
        assert!(table.revoked().is_empty());
        assert!(matches!(table.get("nope"), Err(CapabilityError::Unknown(_))));
    }

    #[test]
    fn test_error_capability_fails() {
        let ctx = Context::new(CapabilityTable::standard());
        let err = ctx
            .capability("error")
            .unwrap()
            .call(&ctx, &[Value::Str("boom".into())])
            .unwrap_err();
        assert_eq!(err.to_string(), "Error: boom");
    }
}
