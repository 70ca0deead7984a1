// Archivo: errors.rs
// Propósito: definir los errores del barrier (chord) y el alias Result<T>
// usado por las APIs del crate. Los mensajes están en español salvo los
// textos que forman parte del reporte de fallo del chord.
use crate::domain::{ChordErrorReport, TaskError, TaskId};
use thiserror::Error;

/// Errores del motor de chords.
///
/// - `Membership`: enlistamiento fuera de un miembro de chord.
/// - `NotReady`: el grupo todavía no terminó (interno, dispara reintento).
/// - `ChordFailure`: uno o más miembros fallaron o el callback no pudo
///   despacharse; es el único error que llega al canal de fallo del chord.
/// - `Dispatch`: el transporte rechazó el callback tras un join exitoso.
#[derive(Error, Debug)]
pub enum ChordError {
    /// Enlistamiento invocado fuera de la ejecución de un miembro de chord.
    #[error("No es miembro de un chord: {0}")]
    Membership(String),

    /// El grupo aún no está listo. Nunca sale del watcher.
    #[error("Grupo no listo: {0}")]
    NotReady(String),

    /// Un miembro falló durante el join. `origin` es `None` cuando el
    /// backend no informa qué miembro produjo el error.
    #[error("Miembro {} falló: {error}", .origin.as_ref().map(|o| o.as_str()).unwrap_or("?"))]
    MemberFailed { origin: Option<TaskId>, error: TaskError },

    /// Fallo agregado del chord.
    #[error("{0}")]
    ChordFailure(ChordErrorReport),

    /// El callback no pudo encolarse después de un join exitoso.
    #[error("Callback error: {0}")]
    Dispatch(String),

    /// El join superó el `join_timeout`.
    #[error("Tiempo de espera agotado: {0}")]
    Timeout(String),

    /// Presupuesto de reintentos agotado en la cola.
    #[error("Reintentos agotados para {task_id} ({max_retries})")]
    MaxRetriesExceeded { task_id: String, max_retries: u32 },

    /// Error genérico del backend de resultados.
    #[error("Error de backend: {0}")]
    Backend(String),

    /// Error genérico de la cola de tareas.
    #[error("Error de cola: {0}")]
    Queue(String),

    /// Entidad no encontrada (chord, tarea registrada, resultado).
    #[error("No encontrado: {0}")]
    NotFound(String),

    /// Configuración inválida.
    #[error("Error de configuración: {0}")]
    Config(String),

    /// Errores de serialización/deserialización JSON.
    #[error("Error de serialización: {0}")]
    Serialization(#[from] serde_json::Error),

    /// La tarea consultada terminó en fallo.
    #[error("Tarea fallida: {0}")]
    TaskFailed(TaskError),
}

impl ChordError {
    /// Representación como `TaskError` para guardar en el backend.
    pub fn to_task_error(&self) -> TaskError {
        match self {
            ChordError::TaskFailed(e) => e.clone(),
            ChordError::MemberFailed { error, .. } => error.clone(),
            ChordError::ChordFailure(r) => TaskError::new("ChordError", r.message.clone()),
            ChordError::MaxRetriesExceeded { .. } => TaskError::new("MaxRetriesExceededError", self.to_string()),
            ChordError::Membership(m) => TaskError::new("ValueError", m.clone()),
            other => TaskError::new("ChordError", other.to_string()),
        }
    }
}

/// Alias de resultado usado por las APIs del crate.
pub type Result<T> = std::result::Result<T, ChordError>;
