//! Named procedure registry exposed to surfaces.
//!
//! Surfaces call host functionality by name over their transport (out of
//! scope here); the registry resolves names to async handlers taking and
//! returning JSON values. Registering a duplicate name is a startup-time
//! contract violation and fails fast.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures_util::future::{BoxFuture, FutureExt};
use relayhub_core::prelude::*;
use serde_json::Value;

pub type ProcedureResult = BoxFuture<'static, Result<Value>>;
pub type Procedure = Arc<dyn Fn(Value) -> ProcedureResult + Send + Sync>;

#[derive(Default)]
pub struct ProcedureRegistry {
    table: Mutex<HashMap<String, Procedure>>,
}

impl ProcedureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an async procedure. Duplicate names fail.
    pub fn register<F>(&self, name: &str, handler: F) -> Result<()>
    where
        F: Fn(Value) -> ProcedureResult + Send + Sync + 'static,
    {
        let mut table = self.table.lock().expect("procedure table poisoned");
        if table.contains_key(name) {
            return Err(Error::duplicate_procedure(name));
        }
        debug!("Registered procedure: {name}");
        table.insert(name.to_string(), Arc::new(handler));
        Ok(())
    }

    /// Register a synchronous handler
    pub fn register_sync<F>(&self, name: &str, handler: F) -> Result<()>
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.register(name, move |params| {
            let output = handler(params);
            async move { output }.boxed()
        })
    }

    /// Invoke a procedure by name
    pub async fn call(&self, name: &str, params: Value) -> Result<Value> {
        let procedure = {
            let table = self.table.lock().expect("procedure table poisoned");
            table.get(name).cloned()
        }
        .ok_or_else(|| Error::unknown_procedure(name))?;
        procedure(params).await
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table
            .lock()
            .expect("procedure table poisoned")
            .contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .table
            .lock()
            .expect("procedure table poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}
