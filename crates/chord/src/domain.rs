// Archivo: domain.rs
// Propósito: tipos de dominio del barrier: identificadores, estados de
// tareas, handles de resultados, descriptores de grupo/chord y el reporte
// de error agregado.
use crate::canvas::Signature;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Id usado como culpable cuando ningún miembro fallido puede atribuirse.
pub const UNKNOWN_CULPRIT: &str = "unknown";

/// Identificador de una unidad de trabajo (tarea, grupo o chord).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Genera un id nuevo (uuid v4).
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn unknown() -> Self {
        Self(UNKNOWN_CULPRIT.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Los grupos comparten el espacio de ids de las tareas.
pub type GroupId = TaskId;

/// Estado de una tarea en el backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Success,
    Failure,
    Revoked,
}

impl TaskState {
    /// Un estado terminal ya no cambia.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskState::Pending)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Pending => "PENDING",
            TaskState::Success => "SUCCESS",
            TaskState::Failure => "FAILURE",
            TaskState::Revoked => "REVOKED",
        };
        write!(f, "{}", s)
    }
}

/// Error de una tarea tal como se guarda en el backend: un tipo y un
/// mensaje, por ejemplo `KeyError("foo")`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: String,
    pub message: String,
}

impl TaskError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self { kind: kind.into(),
               message: message.into() }
    }

    /// Error con el que se marca una tarea revocada al recolectar.
    pub fn revoked(id: &TaskId) -> Self {
        Self::new("TaskRevokedError", id.to_string())
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:?})", self.kind, self.message)
    }
}

impl std::error::Error for TaskError {}

/// Valor o error de una tarea junto a su estado.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "result", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskOutcome {
    Pending,
    Success(JsonValue),
    Failure(TaskError),
    Revoked,
}

impl TaskOutcome {
    pub fn state(&self) -> TaskState {
        match self {
            TaskOutcome::Pending => TaskState::Pending,
            TaskOutcome::Success(_) => TaskState::Success,
            TaskOutcome::Failure(_) => TaskState::Failure,
            TaskOutcome::Revoked => TaskState::Revoked,
        }
    }
}

/// Referencia al resultado de una unidad de trabajo. Inmutable una vez
/// que su estado deja `PENDING`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultHandle {
    pub id: TaskId,
    pub outcome: TaskOutcome,
    pub date_done: Option<DateTime<Utc>>,
}

impl ResultHandle {
    pub fn pending(id: TaskId) -> Self {
        Self { id,
               outcome: TaskOutcome::Pending,
               date_done: None }
    }

    pub fn state(&self) -> TaskState {
        self.outcome.state()
    }

    pub fn is_ready(&self) -> bool {
        self.state().is_terminal()
    }

    /// Error del miembro si falló; `None` en cualquier otro estado.
    pub fn failure(&self) -> Option<&TaskError> {
        match &self.outcome {
            TaskOutcome::Failure(e) => Some(e),
            _ => None,
        }
    }
}

/// Elemento devuelto por `ResultBackend::join`. Algunos backends entregan
/// sólo el valor, sin el id que lo originó: en ese caso `origin` es `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct Joined {
    pub origin: Option<TaskId>,
    pub outcome: TaskOutcome,
}

/// Descriptor de grupo: miembros ordenados según su definición.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupDescriptor {
    pub group_id: GroupId,
    pub members: Vec<TaskId>,
    pub created_at: DateTime<Utc>,
}

impl GroupDescriptor {
    pub fn new(group_id: GroupId, members: Vec<TaskId>) -> Self {
        Self { group_id,
               members,
               created_at: Utc::now() }
    }
}

/// Opciones propias del chord. `None` significa "usar la configuración".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChordOptions {
    pub interval: Option<Duration>,
    pub max_retries: Option<u32>,
    pub join_timeout: Option<Duration>,
    pub propagate: Option<bool>,
}

/// Descriptor del chord. `size` es el conteo autoritativo esperado y puede
/// crecer con enlistamientos dinámicos.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChordDescriptor {
    /// Igual al id congelado del callback: el resultado visible del chord.
    pub chord_id: TaskId,
    pub group: GroupDescriptor,
    pub callback: Signature,
    pub size: usize,
    #[serde(flatten)]
    pub options: ChordOptions,
}

/// Estado del chord en el backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChordStatus {
    Polling,
    Dispatched,
    Failed,
}

impl ChordStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ChordStatus::Polling)
    }
}

/// Reporte de error agregado del chord. Sólo se construye en la ruta de
/// fallo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChordErrorReport {
    pub culprit_id: TaskId,
    pub exceptions: Vec<(TaskId, TaskError)>,
    pub message: String,
}

impl ChordErrorReport {
    /// Fallo de un miembro: `Dependency <culprit> raised <error>`.
    pub fn dependency(culprit_id: TaskId, error: &TaskError, exceptions: Vec<(TaskId, TaskError)>) -> Self {
        let message = format!("Dependency {} raised {}", culprit_id, error);
        Self { culprit_id,
               exceptions,
               message }
    }

    /// Fallo al despachar el callback. El culpable es el propio callback.
    pub fn callback(chord_id: TaskId, message: String) -> Self {
        Self { culprit_id: chord_id,
               exceptions: Vec::new(),
               message }
    }
}

impl fmt::Display for ChordErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}
