//! Per-session project bindings under optimistic concurrency.

use crate::gate::{Admitted, Operation};
use crate::outcome::{store_error, StoreOutcome, TieredStore};
use quill_core::entry::now_rfc3339;
use quill_core::{CoreError, CoreResult, ProjectBinding};
use quill_ledger::paths::validate_project_name;
use quill_store::StoreError;
use std::sync::Arc;

pub struct BindingProtocol {
    store: Arc<TieredStore>,
}

impl BindingProtocol {
    pub fn new(store: Arc<TieredStore>) -> Self {
        Self { store }
    }

    pub fn get_binding(&self, session_id: &str) -> CoreResult<Option<ProjectBinding>> {
        self.store.get_binding(session_id).into_core()
    }

    /// Conditional write. `expected_version` 0 creates the binding. A lost race
    /// returns `Conflict` with the true current version; there is no retry here.
    pub fn set_binding(
        &self,
        session_id: &str,
        project_name: Option<&str>,
        expected_version: u64,
        updated_by: &str,
    ) -> CoreResult<ProjectBinding> {
        if updated_by.trim().is_empty() {
            return Err(CoreError::InvalidIdentity {
                field: "agent_identity",
            });
        }
        if let Some(name) = project_name {
            validate_project_name(name)?;
        }

        let outcome = self.store.set_binding(
            session_id,
            project_name,
            expected_version,
            updated_by,
            &now_rfc3339(),
        );
        match outcome {
            StoreOutcome::Success(b) | StoreOutcome::Degraded(b) => Ok(b),
            StoreOutcome::Conflict { current_version } => {
                tracing::debug!(
                    session_id,
                    expected_version,
                    current_version,
                    "binding write lost"
                );
                Err(CoreError::Conflict {
                    session_id: session_id.to_string(),
                    expected_version,
                    current_version,
                })
            }
            StoreOutcome::Fatal(StoreError::NotFound(_)) => Err(CoreError::BindingNotFound {
                session_id: session_id.to_string(),
                expected_version,
            }),
            StoreOutcome::Fatal(e) => Err(store_error(e)),
        }
    }

    /// Read the legacy global project pointer. Requires gate admission.
    pub fn legacy_project(&self, admitted: &Admitted) -> CoreResult<Option<String>> {
        expect_operation(admitted, Operation::ReadLegacyProject)?;
        self.store.legacy_project().into_core()
    }

    pub fn set_legacy_project(&self, admitted: &Admitted, project_name: Option<&str>) -> CoreResult<()> {
        expect_operation(admitted, Operation::WriteLegacyProject)?;
        if let Some(name) = project_name {
            validate_project_name(name)?;
        }
        self.store.set_legacy_project(project_name).into_core()
    }
}

/// An admission is only good for the operation it was issued for.
fn expect_operation(admitted: &Admitted, operation: Operation) -> CoreResult<()> {
    if admitted.operation() != operation {
        return Err(CoreError::ScopeViolation {
            session_id: admitted.session_id().to_string(),
            mode: admitted.mode(),
            operation: operation.as_str(),
        });
    }
    Ok(())
}
