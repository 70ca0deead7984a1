// Archivo: result.rs
// Propósito: `AsyncResult`, el handle que recibe quien lanza un chord.
use crate::backend::ResultBackend;
use crate::domain::{ResultHandle, TaskId, TaskOutcome, TaskState};
use crate::errors::{ChordError, Result};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;

/// Handle al resultado de una tarea o chord. En modo eager ya trae el
/// resultado y no consulta el backend.
pub struct AsyncResult {
    id: TaskId,
    backend: Arc<dyn ResultBackend>,
    eager: Option<TaskOutcome>,
}

impl AsyncResult {
    pub fn new(id: TaskId, backend: Arc<dyn ResultBackend>) -> Self {
        Self { id,
               backend,
               eager: None }
    }

    pub fn eager(id: TaskId, outcome: TaskOutcome, backend: Arc<dyn ResultBackend>) -> Self {
        Self { id,
               backend,
               eager: Some(outcome) }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn is_eager(&self) -> bool {
        self.eager.is_some()
    }

    pub fn handle(&self) -> Result<ResultHandle> {
        match &self.eager {
            Some(outcome) => Ok(ResultHandle { id: self.id.clone(),
                                               outcome: outcome.clone(),
                                               date_done: None }),
            None => self.backend.get_handle(&self.id),
        }
    }

    pub fn state(&self) -> Result<TaskState> {
        Ok(self.handle()?.state())
    }

    /// Espera el resultado (como máximo `timeout`). Un fallo de la tarea
    /// se devuelve como `ChordError::TaskFailed`.
    pub fn get(&self, timeout: Option<Duration>) -> Result<JsonValue> {
        let outcome = match &self.eager {
            Some(outcome) => outcome.clone(),
            None => {
                let joined = self.backend.join(std::slice::from_ref(&self.id), timeout)?;
                joined.into_iter()
                      .next()
                      .map(|j| j.outcome)
                      .ok_or_else(|| ChordError::NotFound(format!("resultado {}", self.id)))?
            }
        };
        match outcome {
            TaskOutcome::Success(v) => Ok(v),
            TaskOutcome::Failure(e) => Err(ChordError::TaskFailed(e)),
            TaskOutcome::Revoked => Err(ChordError::TaskFailed(crate::domain::TaskError::revoked(&self.id))),
            TaskOutcome::Pending => Err(ChordError::Timeout(format!("resultado {}", self.id))),
        }
    }
}
