//! Authentication and routing of call envelopes.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::registry::{CallContext, MethodTable};
use crate::users::{Authenticator, CallerId, UserStoreError};

use super::DISPATCH_TARGET;
use super::errors::DispatchError;

/// One module method invocation as received from the wire.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct CallEnvelope {
    /// Target module.
    #[serde(alias = "Module")]
    pub module: String,
    /// Target method.
    #[serde(alias = "Method")]
    pub method: String,
    /// Caller's authkey.
    #[serde(default, alias = "Authkey", alias = "AuthKey")]
    pub authkey: String,
    /// Positional list or field-keyed map.
    #[serde(default, alias = "Params")]
    pub params: Value,
}

impl CallEnvelope {
    /// Builds an envelope.
    pub fn new(
        module: impl Into<String>,
        method: impl Into<String>,
        authkey: impl Into<String>,
        params: Value,
    ) -> Self {
        Self {
            module: module.into(),
            method: method.into(),
            authkey: authkey.into(),
            params,
        }
    }
}

/// Authenticates callers and invokes methods from a frozen table.
pub struct Dispatcher {
    table: MethodTable,
    auth: Arc<dyn Authenticator>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Dispatcher")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Creates a dispatcher over `table`.
    pub fn new(table: MethodTable, auth: Arc<dyn Authenticator>) -> Self {
        Self { table, auth }
    }

    /// Frozen method table.
    #[must_use]
    pub fn table(&self) -> &MethodTable {
        &self.table
    }

    /// Authenticates, then invokes one envelope.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::AuthFailure`] before any lookup when the
    /// authkey is not accepted, then lookup, binding or method failures.
    pub fn call(&self, envelope: &CallEnvelope) -> Result<Value, DispatchError> {
        let caller = self.authenticate(&envelope.authkey)?;
        self.dispatch(caller, envelope)
    }

    /// Runs envelopes in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first failing call's error; earlier results are discarded.
    pub fn call_many(&self, envelopes: &[CallEnvelope]) -> Result<Vec<Value>, DispatchError> {
        envelopes
            .iter()
            .enumerate()
            .map(|(index, envelope)| {
                self.call(envelope).inspect_err(|error| {
                    debug!(
                        target: DISPATCH_TARGET,
                        index,
                        code = error.code(),
                        "batch aborted"
                    );
                })
            })
            .collect()
    }

    fn authenticate(&self, authkey: &str) -> Result<CallerId, DispatchError> {
        self.auth.authenticate(authkey).map_err(|error| match error {
            UserStoreError::UnknownAuthkey => DispatchError::auth("unknown authkey"),
            other => DispatchError::auth(other.to_string()),
        })
    }

    fn dispatch(&self, caller: CallerId, envelope: &CallEnvelope) -> Result<Value, DispatchError> {
        let Some((module, entry)) = self.table.lookup(&envelope.module, &envelope.method) else {
            return Err(DispatchError::not_found(&envelope.module, &envelope.method));
        };
        let context = CallContext {
            caller,
            authkey: envelope.authkey.clone(),
            module,
            method: entry.name(),
        };
        debug!(
            target: DISPATCH_TARGET,
            module,
            method = entry.name(),
            %caller,
            "dispatching call"
        );
        entry.call(&context, &envelope.params)
    }
}
