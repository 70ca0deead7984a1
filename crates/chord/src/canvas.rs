// Archivo: canvas.rs
// Propósito: firmas de tareas (`Signature`), árboles de grupos (`Canvas`)
// y el builder de chords que usan los llamadores.
//
// El conteo de hojas de un árbol de grupos es una función pura sobre la
// descripción del árbol: no recorre objetos vivos en tiempo de ejecución.
use crate::domain::{ChordOptions, GroupId, TaskId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::time::Duration;

/// Opciones de ejecución de una firma.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignatureOptions {
    /// Id pre-asignado; se usa como token de idempotencia al encolar.
    pub task_id: Option<TaskId>,
    /// Grupo al que pertenece la tarea, si es miembro de un chord.
    pub group_id: Option<GroupId>,
    /// Callback del chord al que pertenece la tarea.
    pub chord: Option<Box<Signature>>,
}

/// Descripción transportable de una invocación: nombre de tarea registrado,
/// argumentos posicionales, argumentos con nombre y opciones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub task: String,
    #[serde(default)]
    pub args: Vec<JsonValue>,
    #[serde(default)]
    pub kwargs: Map<String, JsonValue>,
    #[serde(default)]
    pub options: SignatureOptions,
}

impl Signature {
    pub fn new(task: impl Into<String>) -> Self {
        Self { task: task.into(),
               args: Vec::new(),
               kwargs: Map::new(),
               options: SignatureOptions::default() }
    }

    /// Firma con argumentos posicionales.
    pub fn with_args(task: impl Into<String>, args: Vec<JsonValue>) -> Self {
        let mut sig = Self::new(task);
        sig.args = args;
        sig
    }

    pub fn kwarg(mut self, key: &str, value: JsonValue) -> Self {
        self.kwargs.insert(key.to_string(), value);
        self
    }

    pub fn with_id(mut self, id: TaskId) -> Self {
        self.options.task_id = Some(id);
        self
    }

    pub fn id(&self) -> Option<&TaskId> {
        self.options.task_id.as_ref()
    }

    /// Asigna un id si todavía no tiene y lo devuelve.
    pub fn freeze(&mut self) -> TaskId {
        self.options.task_id.get_or_insert_with(TaskId::new).clone()
    }

    /// Copia congelada: el original del llamador no se modifica.
    pub fn frozen(&self) -> Signature {
        let mut sig = self.clone();
        sig.freeze();
        sig
    }

    /// Vincula la firma a un grupo y al callback de su chord.
    pub fn link_chord(&mut self, group_id: &GroupId, callback: &Signature) {
        self.options.group_id = Some(group_id.clone());
        self.options.chord = Some(Box::new(callback.clone()));
    }

    /// Copia con `prepend` antepuesto a los argumentos parciales.
    pub fn partial(&self, prepend: Vec<JsonValue>) -> Signature {
        let mut sig = self.clone();
        let mut args = prepend;
        args.extend(sig.args.drain(..));
        sig.args = args;
        sig
    }
}

/// Árbol de trabajo: una tarea o un grupo (posiblemente anidado).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Canvas {
    Task(Signature),
    Group(Vec<Canvas>),
}

impl Canvas {
    /// Construye un grupo a partir de firmas o sub-grupos.
    pub fn group<I, C>(items: I) -> Self
        where I: IntoIterator<Item = C>,
              C: Into<Canvas>
    {
        Canvas::Group(items.into_iter().map(Into::into).collect())
    }

    /// Número de tareas hoja. Un grupo de grupos cuenta hojas, no entradas.
    pub fn leaf_count(&self) -> usize {
        match self {
            Canvas::Task(_) => 1,
            Canvas::Group(children) => leaf_count(children),
        }
    }

    /// Hojas en orden de definición (recorrido en profundidad).
    pub fn leaves(&self) -> Vec<&Signature> {
        let mut out = Vec::with_capacity(self.leaf_count());
        collect_leaves(self, &mut out);
        out
    }
}

/// Conteo de hojas de una lista de nodos.
pub fn leaf_count(nodes: &[Canvas]) -> usize {
    nodes.iter().map(Canvas::leaf_count).sum()
}

fn collect_leaves<'a>(node: &'a Canvas, out: &mut Vec<&'a Signature>) {
    match node {
        Canvas::Task(sig) => out.push(sig),
        Canvas::Group(children) => {
            for child in children {
                collect_leaves(child, out);
            }
        }
    }
}

impl From<Signature> for Canvas {
    fn from(sig: Signature) -> Self {
        Canvas::Task(sig)
    }
}

impl From<Vec<Signature>> for Canvas {
    fn from(sigs: Vec<Signature>) -> Self {
        Canvas::group(sigs)
    }
}

impl FromIterator<Signature> for Canvas {
    fn from_iter<T: IntoIterator<Item = Signature>>(iter: T) -> Self {
        Canvas::group(iter)
    }
}

/// Chord tal como lo arma el llamador: cabecera (grupo), cuerpo (callback)
/// y opciones. `ChordOrchestrator::apply` lo convierte en descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chord {
    pub header: Canvas,
    pub body: Signature,
    #[serde(default)]
    pub options: ChordOptions,
    #[serde(default)]
    pub kwargs: Map<String, JsonValue>,
}

impl Chord {
    pub fn new(header: impl Into<Canvas>, body: Signature) -> Self {
        Self { header: header.into(),
               body,
               options: ChordOptions::default(),
               kwargs: Map::new() }
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.options.interval = Some(interval);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.options.max_retries = Some(max_retries);
        self
    }

    pub fn join_timeout(mut self, timeout: Duration) -> Self {
        self.options.join_timeout = Some(timeout);
        self
    }

    pub fn propagate(mut self, propagate: bool) -> Self {
        self.options.propagate = Some(propagate);
        self
    }

    /// Tamaño inicial del chord (hojas de la cabecera).
    pub fn size(&self) -> usize {
        self.header.leaf_count()
    }
}
