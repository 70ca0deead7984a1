// Archivo: queue.rs
// Propósito: contrato de la cola de tareas tal como lo usa el barrier:
// encolar una firma (con countdown e id opcionales) y re-encolar la
// invocación actual como reintento.
use crate::canvas::Signature;
use crate::domain::TaskId;
use crate::errors::Result;
use crate::task::TaskRequest;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Mensaje tal como lo transporta la cola.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    /// Firma congelada: `options.task_id` siempre presente.
    pub signature: Signature,
    pub countdown: Option<Duration>,
    /// Reintentos ya consumidos por esta invocación.
    pub retries: u32,
}

impl TaskMessage {
    pub fn id(&self) -> Option<&TaskId> {
        self.signature.id()
    }
}

pub trait TaskQueue: Send + Sync {
    /// Encola `signature`. Si trae `task_id` se usa como token de
    /// idempotencia: volver a encolar el mismo id se ignora.
    fn enqueue(&self, signature: &Signature, countdown: Option<Duration>) -> Result<TaskId>;

    /// Re-encola la invocación actual con su estado. Cada reintento
    /// consume una unidad del presupuesto; agotarlo devuelve
    /// `ChordError::MaxRetriesExceeded`.
    fn retry(&self, request: &TaskRequest, countdown: Duration, max_retries: Option<u32>) -> Result<()>;
}
