// Archivo: task.rs
// Propósito: runtime mínimo de tareas: el trait `Task`, el contexto de
// ejecución (`TaskRequest` / `TaskContext`) y el registro ordenado de
// tareas por nombre.
use crate::backend::ResultBackend;
use crate::canvas::{Signature, SignatureOptions};
use crate::domain::{GroupId, TaskError, TaskId};
use crate::enlist::{enlist, Enlisted};
use crate::errors::{ChordError, Result};
use crate::queue::{TaskMessage, TaskQueue};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use std::time::Duration;

pub type TaskResult = std::result::Result<JsonValue, TaskFailure>;

/// Motivo por el que una ejecución no produjo valor.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskFailure {
    /// Error de la tarea; el worker lo guarda como resultado.
    Error(TaskError),
    /// La invocación pidió reintentarse (ver `TaskContext::retry`); el
    /// worker no guarda nada.
    Retry { countdown: Duration },
}

impl From<TaskError> for TaskFailure {
    fn from(e: TaskError) -> Self {
        TaskFailure::Error(e)
    }
}

impl From<ChordError> for TaskFailure {
    fn from(e: ChordError) -> Self {
        TaskFailure::Error(e.to_task_error())
    }
}

/// Trait que representa una tarea ejecutable por un worker.
pub trait Task: Send + Sync {
    /// Nombre con el que se registra y se referencia desde las firmas.
    fn name(&self) -> &str;

    fn run(&self, ctx: &TaskContext) -> TaskResult;
}

/// Tarea a partir de una closure.
pub struct FnTask<F> {
    name: String,
    f: F,
}

impl<F> Task for FnTask<F> where F: Fn(&TaskContext) -> TaskResult + Send + Sync
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, ctx: &TaskContext) -> TaskResult {
        (self.f)(ctx)
    }
}

/// Crea una tarea con nombre a partir de una closure.
pub fn task_fn<F>(name: &str, f: F) -> FnTask<F>
    where F: Fn(&TaskContext) -> TaskResult + Send + Sync
{
    FnTask { name: name.to_string(),
             f }
}

/// Petición de ejecución: lo que la tarea sabe de su propia invocación.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub id: TaskId,
    pub task: String,
    pub args: Vec<JsonValue>,
    pub kwargs: Map<String, JsonValue>,
    /// Grupo de origen si la tarea es miembro de un chord.
    pub group_id: Option<GroupId>,
    /// Callback del chord al que pertenece la tarea.
    pub chord: Option<Signature>,
    pub retries: u32,
}

impl TaskRequest {
    pub fn from_signature(sig: &Signature, retries: u32) -> Self {
        Self { id: sig.id().cloned().unwrap_or_default(),
               task: sig.task.clone(),
               args: sig.args.clone(),
               kwargs: sig.kwargs.clone(),
               group_id: sig.options.group_id.clone(),
               chord: sig.options.chord.as_deref().cloned(),
               retries }
    }

    pub fn from_message(message: &TaskMessage) -> Self {
        Self::from_signature(&message.signature, message.retries)
    }

    /// Firma equivalente a esta invocación (misma id, mismo estado).
    pub fn to_signature(&self) -> Signature {
        Signature { task: self.task.clone(),
                    args: self.args.clone(),
                    kwargs: self.kwargs.clone(),
                    options: SignatureOptions { task_id: Some(self.id.clone()),
                                                group_id: self.group_id.clone(),
                                                chord: self.chord.clone().map(Box::new) } }
    }

    /// `true` si la invocación pertenece a un chord.
    pub fn is_chord_member(&self) -> bool {
        self.group_id.is_some() && self.chord.is_some()
    }
}

/// Contexto pasado a las tareas: la petición más el backend y la cola
/// inyectados.
pub struct TaskContext {
    pub request: TaskRequest,
    pub backend: Arc<dyn ResultBackend>,
    pub queue: Arc<dyn TaskQueue>,
    inline: bool,
}

impl TaskContext {
    pub fn new(request: TaskRequest, backend: Arc<dyn ResultBackend>, queue: Arc<dyn TaskQueue>) -> Self {
        Self { request,
               backend,
               queue,
               inline: false }
    }

    /// Contexto de una ejecución en línea (modo eager): `retry` no toca la
    /// cola y quien ejecuta repite la tarea en el acto.
    pub fn inline(mut self) -> Self {
        self.inline = true;
        self
    }

    pub fn is_inline(&self) -> bool {
        self.inline
    }

    pub fn args(&self) -> &[JsonValue] {
        &self.request.args
    }

    /// Argumento posicional como entero.
    pub fn arg_i64(&self, index: usize) -> std::result::Result<i64, TaskError> {
        self.request
            .args
            .get(index)
            .and_then(JsonValue::as_i64)
            .ok_or_else(|| TaskError::new("TypeError", format!("argumento {} no es entero", index)))
    }

    /// Pide reintentar esta invocación. Devuelve lo que la tarea debe
    /// retornar: `TaskFailure::Retry` o, si el presupuesto se agotó, el
    /// error de reintentos agotados.
    ///
    /// Fuera del modo eager la invocación se re-encola con `countdown`; en
    /// línea sólo se verifica el presupuesto.
    pub fn retry(&self, countdown: Duration, max_retries: Option<u32>) -> TaskFailure {
        let scheduled = if self.inline {
            match max_retries {
                Some(max) if self.request.retries >= max => {
                    Err(ChordError::MaxRetriesExceeded { task_id: self.request.id.to_string(),
                                                         max_retries: max })
                }
                _ => Ok(()),
            }
        } else {
            self.queue.retry(&self.request, countdown, max_retries)
        };
        match scheduled {
            Ok(()) => TaskFailure::Retry { countdown },
            Err(e) => e.into(),
        }
    }

    /// Agrega `signature` al chord de esta tarea. Ver `enlist::enlist`.
    pub fn add_to_chord(&self, signature: Signature, lazy: bool) -> Result<Enlisted> {
        enlist(self, signature, lazy)
    }
}

/// Registro de tareas por nombre, en orden de registro.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: IndexMap<String, Arc<dyn Task>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self { tasks: IndexMap::new() }
    }

    /// Registra una tarea. Un nombre repetido reemplaza a la anterior.
    pub fn register<T: Task + 'static>(&mut self, task: T) -> &mut Self {
        self.tasks.insert(task.name().to_string(), Arc::new(task));
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Task>> {
        self.tasks
            .get(name)
            .cloned()
            .ok_or_else(|| ChordError::NotFound(format!("tarea no registrada '{}'", name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tasks.keys().map(String::as_str).collect()
    }
}
