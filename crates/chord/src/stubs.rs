// Archivo: stubs.rs
// Propósito: implementaciones en memoria para pruebas y wiring rápido.
//
// Incluye un backend de resultados (`InMemoryBackend`), una cola
// (`InMemoryQueue`) y un worker síncrono (`InMemoryWorker`). No son
// durables ni distribuidos; se usan para demos o pruebas locales.
use crate::backend::{ResultBackend, JOIN_POLL_INTERVAL};
use crate::canvas::Signature;
use crate::config::ChordConfig;
use crate::domain::{ChordDescriptor, ChordErrorReport, ChordStatus, GroupId, Joined, ResultHandle, TaskId, TaskOutcome};
use crate::errors::{ChordError, Result};
use crate::orchestrator::ChordOrchestrator;
use crate::queue::{TaskMessage, TaskQueue};
use crate::size::SizeTracker;
use crate::task::{TaskContext, TaskFailure, TaskRegistry, TaskRequest};
use crate::watcher::{ChordUnlockTask, ChordWatcher};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rayon::prelude::*;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct ChordRecord {
    descriptor: Option<ChordDescriptor>,
    status: ChordStatus,
    report: Option<ChordErrorReport>,
}

#[derive(Debug, Clone, Default)]
struct GroupRecord {
    members: Vec<TaskId>,
    expected: Option<usize>,
    completed: usize,
}

/// Backend de resultados en memoria.
///
/// Los mapas son `DashMap`: cada operación compuesta (guardar si no es
/// terminal, agregar miembro, transición de estado) se hace dentro de una
/// sola entrada y es atómica respecto de las demás.
#[derive(Debug)]
pub struct InMemoryBackend {
    results: DashMap<TaskId, ResultHandle>,
    chords: DashMap<TaskId, ChordRecord>,
    groups: DashMap<GroupId, GroupRecord>,
    native_counting: bool,
    join_origins: bool,
}

impl InMemoryBackend {
    /// Backend con contadores nativos.
    pub fn new() -> Self {
        Self { results: DashMap::new(),
               chords: DashMap::new(),
               groups: DashMap::new(),
               native_counting: true,
               join_origins: true }
    }

    /// Backend sin contadores: la readiness se calcula recorriendo los
    /// handles de los miembros.
    pub fn without_native_counting() -> Self {
        Self { native_counting: false,
               ..Self::new() }
    }

    /// El join devuelve sólo valores, sin el id de origen.
    pub fn without_join_origins(mut self) -> Self {
        self.join_origins = false;
        self
    }

    /// Marca una tarea como revocada.
    pub fn revoke(&self, id: &TaskId) -> Result<bool> {
        self.store_result(id, TaskOutcome::Revoked)
    }

    /// Reporte de fallo registrado para el chord, si lo hay.
    pub fn chord_report(&self, chord_id: &TaskId) -> Option<ChordErrorReport> {
        self.chords.get(chord_id).and_then(|r| r.report.clone())
    }

    /// Descriptor con el que se registró el chord.
    pub fn chord_descriptor(&self, chord_id: &TaskId) -> Option<ChordDescriptor> {
        self.chords.get(chord_id).and_then(|r| r.descriptor.clone())
    }

    /// Compare-and-set del estado del chord: sólo cambia si el estado
    /// actual es `from`. Un chord desconocido cuenta como `Polling`.
    fn transition(&self,
                  chord_id: &TaskId,
                  from: ChordStatus,
                  to: ChordStatus,
                  report: Option<&ChordErrorReport>)
                  -> bool {
        match self.chords.entry(chord_id.clone()) {
            Entry::Occupied(mut o) => {
                let record = o.get_mut();
                if record.status != from {
                    return false;
                }
                record.status = to;
                record.report = report.cloned();
                true
            }
            Entry::Vacant(v) => {
                if from != ChordStatus::Polling {
                    return false;
                }
                v.insert(ChordRecord { descriptor: None,
                                       status: to,
                                       report: report.cloned() });
                true
            }
        }
    }

    fn record_failure(&self, chord_id: &TaskId, report: &ChordErrorReport) -> Result<()> {
        let error = ChordError::ChordFailure(report.clone()).to_task_error();
        self.store_result(chord_id, TaskOutcome::Failure(error))?;
        Ok(())
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultBackend for InMemoryBackend {
    fn get_handle(&self, id: &TaskId) -> Result<ResultHandle> {
        Ok(self.results
               .get(id)
               .map(|h| h.clone())
               .unwrap_or_else(|| ResultHandle::pending(id.clone())))
    }

    fn store_result(&self, id: &TaskId, outcome: TaskOutcome) -> Result<bool> {
        let date_done = outcome.state().is_terminal().then(Utc::now);
        let handle = ResultHandle { id: id.clone(),
                                    outcome,
                                    date_done };
        match self.results.entry(id.clone()) {
            Entry::Occupied(mut o) => {
                if o.get().is_ready() {
                    log::debug!("resultado de {} ya registrado, se ignora", id);
                    return Ok(false);
                }
                o.insert(handle);
                Ok(true)
            }
            Entry::Vacant(v) => {
                v.insert(handle);
                Ok(true)
            }
        }
    }

    /// Lectura por lotes: espera a que todos los ids terminen y luego
    /// devuelve los resultados en el orden pedido.
    fn join(&self, ids: &[TaskId], timeout: Option<Duration>) -> Result<Vec<Joined>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let handles = ids.iter().map(|id| self.get_handle(id)).collect::<Result<Vec<_>>>()?;
            if handles.iter().all(ResultHandle::is_ready) {
                return Ok(handles.into_iter()
                                 .map(|h| Joined { origin: self.join_origins.then_some(h.id),
                                                   outcome: h.outcome })
                                 .collect());
            }
            if let Some(d) = deadline {
                if Instant::now() >= d {
                    let pending = handles.iter().filter(|h| !h.is_ready()).count();
                    return Err(ChordError::Timeout(format!("join: {} de {} pendientes", pending, ids.len())));
                }
            }
            std::thread::sleep(JOIN_POLL_INTERVAL);
        }
    }

    fn supports_native_counting(&self) -> bool {
        self.native_counting
    }

    fn set_expected_size(&self, group_id: &GroupId, size: usize) -> Result<()> {
        self.groups.entry(group_id.clone()).or_default().expected = Some(size);
        Ok(())
    }

    fn expected_size(&self, group_id: &GroupId) -> Result<Option<usize>> {
        Ok(self.groups.get(group_id).and_then(|g| g.expected))
    }

    fn increment_completed(&self, group_id: &GroupId) -> Result<usize> {
        if !self.native_counting {
            return Err(ChordError::Backend(format!("el backend no soporta contadores (grupo {})", group_id)));
        }
        let mut group = self.groups.entry(group_id.clone()).or_default();
        group.completed += 1;
        Ok(group.completed)
    }

    fn completed_count(&self, group_id: &GroupId) -> Result<usize> {
        Ok(self.groups.get(group_id).map(|g| g.completed).unwrap_or(0))
    }

    fn apply_chord(&self, descriptor: &ChordDescriptor) -> Result<bool> {
        match self.chords.entry(descriptor.chord_id.clone()) {
            Entry::Occupied(_) => return Ok(false),
            Entry::Vacant(v) => {
                v.insert(ChordRecord { descriptor: Some(descriptor.clone()),
                                       status: ChordStatus::Polling,
                                       report: None });
            }
        }
        let mut group = self.groups.entry(descriptor.group.group_id.clone()).or_default();
        if group.members.is_empty() {
            group.members = descriptor.group.members.clone();
        }
        Ok(true)
    }

    fn group_members(&self, group_id: &GroupId) -> Result<Option<Vec<TaskId>>> {
        Ok(self.groups
               .get(group_id)
               .filter(|g| !g.members.is_empty())
               .map(|g| g.members.clone()))
    }

    fn add_to_chord(&self, group_id: &GroupId, task_id: &TaskId) -> Result<usize> {
        let mut group = self.groups.entry(group_id.clone()).or_default();
        let expected = group.expected.unwrap_or(group.members.len()) + 1;
        group.expected = Some(expected);
        group.members.push(task_id.clone());
        Ok(expected)
    }

    fn chord_status(&self, chord_id: &TaskId) -> Result<Option<ChordStatus>> {
        Ok(self.chords.get(chord_id).map(|r| r.status))
    }

    fn mark_dispatched(&self, chord_id: &TaskId) -> Result<bool> {
        Ok(self.transition(chord_id, ChordStatus::Polling, ChordStatus::Dispatched, None))
    }

    fn fail_chord(&self, chord_id: &TaskId, report: &ChordErrorReport) -> Result<bool> {
        if !self.transition(chord_id, ChordStatus::Polling, ChordStatus::Failed, Some(report)) {
            return Ok(false);
        }
        self.record_failure(chord_id, report)?;
        Ok(true)
    }

    fn fail_dispatch(&self, chord_id: &TaskId, report: &ChordErrorReport) -> Result<bool> {
        if !self.transition(chord_id, ChordStatus::Dispatched, ChordStatus::Failed, Some(report)) {
            return Ok(false);
        }
        self.record_failure(chord_id, report)?;
        Ok(true)
    }
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<TaskMessage>,
    seen: HashSet<TaskId>,
    history: Vec<TaskMessage>,
}

/// Cola FIFO en memoria. El countdown sólo se registra: los mensajes se
/// entregan en orden de llegada.
#[derive(Debug, Default)]
pub struct InMemoryQueue {
    state: Mutex<QueueState>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Helper para mapear `Mutex::lock()` en un `Result` con
    /// `ChordError::Queue`.
    fn lock(&self) -> Result<MutexGuard<'_, QueueState>> {
        self.state
            .lock()
            .map_err(|e| ChordError::Queue(format!("mutex poisoned: {:?}", e)))
    }

    pub fn pop(&self) -> Result<Option<TaskMessage>> {
        Ok(self.lock()?.pending.pop_front())
    }

    /// Saca todos los mensajes pendientes.
    pub fn drain(&self) -> Result<Vec<TaskMessage>> {
        Ok(self.lock()?.pending.drain(..).collect())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.pending.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.lock()?.pending.is_empty())
    }

    /// Todos los mensajes aceptados, reintentos incluidos.
    pub fn history(&self) -> Result<Vec<TaskMessage>> {
        Ok(self.lock()?.history.clone())
    }

    fn push(state: &mut QueueState, message: TaskMessage) {
        state.history.push(message.clone());
        state.pending.push_back(message);
    }
}

impl TaskQueue for InMemoryQueue {
    fn enqueue(&self, signature: &Signature, countdown: Option<Duration>) -> Result<TaskId> {
        let signature = signature.frozen();
        let id = signature.id().cloned().unwrap_or_default();
        let mut state = self.lock()?;
        if !state.seen.insert(id.clone()) {
            log::debug!("tarea {} ya encolada, se ignora", id);
            return Ok(id);
        }
        Self::push(&mut state,
                   TaskMessage { signature,
                                 countdown,
                                 retries: 0 });
        Ok(id)
    }

    fn retry(&self, request: &TaskRequest, countdown: Duration, max_retries: Option<u32>) -> Result<()> {
        if let Some(max) = max_retries {
            if request.retries >= max {
                return Err(ChordError::MaxRetriesExceeded { task_id: request.id.to_string(),
                                                            max_retries: max });
            }
        }
        let mut state = self.lock()?;
        Self::push(&mut state,
                   TaskMessage { signature: request.to_signature(),
                                 countdown: Some(countdown),
                                 retries: request.retries + 1 });
        Ok(())
    }
}

/// Worker síncrono sobre `InMemoryQueue`.
///
/// Ejecuta la tarea, guarda su resultado y, si es miembro de un chord y el
/// resultado es nuevo, reporta la finalización al `SizeTracker`. Una señal
/// de reintento no guarda nada.
pub struct InMemoryWorker {
    registry: Arc<TaskRegistry>,
    backend: Arc<dyn ResultBackend>,
    queue: Arc<InMemoryQueue>,
}

impl InMemoryWorker {
    pub fn new(registry: Arc<TaskRegistry>, backend: Arc<dyn ResultBackend>, queue: Arc<InMemoryQueue>) -> Self {
        Self { registry,
               backend,
               queue }
    }

    /// Ejecuta un mensaje. Devuelve el resultado guardado, o `Pending` si
    /// la tarea pidió reintento.
    pub fn execute(&self, message: &TaskMessage) -> Result<TaskOutcome> {
        let request = TaskRequest::from_message(message);
        let task = self.registry.get(&request.task)?;
        let queue: Arc<dyn TaskQueue> = self.queue.clone();
        let ctx = TaskContext::new(request.clone(), self.backend.clone(), queue);

        let outcome = match task.run(&ctx) {
            Ok(v) => TaskOutcome::Success(v),
            Err(TaskFailure::Retry { countdown }) => {
                log::debug!("{} ({}) reintenta en {:?}", request.task, request.id, countdown);
                return Ok(TaskOutcome::Pending);
            }
            Err(TaskFailure::Error(e)) => TaskOutcome::Failure(e),
        };

        let stored = self.backend.store_result(&request.id, outcome.clone())?;
        if stored {
            if let (true, Some(group_id)) = (request.is_chord_member(), &request.group_id) {
                SizeTracker::new(self.backend.as_ref()).on_member_complete(group_id)?;
            }
        }
        Ok(outcome)
    }

    /// Ejecuta el siguiente mensaje, si hay.
    pub fn run_once(&self) -> Result<Option<TaskOutcome>> {
        match self.queue.pop()? {
            Some(message) => self.execute(&message).map(Some),
            None => Ok(None),
        }
    }

    /// Procesa mensajes hasta vaciar la cola o alcanzar `max_steps`.
    /// Devuelve cuántos ejecutó.
    pub fn run_until_idle(&self, max_steps: usize) -> Result<usize> {
        let mut steps = 0;
        while steps < max_steps {
            if self.run_once()?.is_none() {
                break;
            }
            steps += 1;
        }
        Ok(steps)
    }

    /// Ejecuta en paralelo todos los mensajes pendientes en este momento.
    /// Los resultados vuelven en el orden en que estaban encolados.
    pub fn run_batch_parallel(&self) -> Result<Vec<TaskOutcome>> {
        let batch = self.queue.drain()?;
        batch.par_iter().map(|m| self.execute(m)).collect()
    }
}

/// Backend, cola, worker y orquestador en memoria, con `chord.unlock` ya
/// registrado.
pub struct InMemoryRuntime {
    pub backend: Arc<InMemoryBackend>,
    pub queue: Arc<InMemoryQueue>,
    pub registry: Arc<TaskRegistry>,
    pub worker: InMemoryWorker,
    pub orchestrator: ChordOrchestrator,
}

impl InMemoryRuntime {
    pub fn new(config: ChordConfig, registry: TaskRegistry) -> Self {
        Self::with_backend(config, registry, InMemoryBackend::new())
    }

    pub fn with_backend(config: ChordConfig, mut registry: TaskRegistry, backend: InMemoryBackend) -> Self {
        let backend = Arc::new(backend);
        let queue = Arc::new(InMemoryQueue::new());
        let dyn_backend: Arc<dyn ResultBackend> = backend.clone();
        let dyn_queue: Arc<dyn TaskQueue> = queue.clone();

        let watcher = ChordWatcher::new(dyn_backend.clone(), dyn_queue.clone(), config.clone());
        registry.register(ChordUnlockTask::new(Arc::new(watcher)));
        let registry = Arc::new(registry);

        let worker = InMemoryWorker::new(registry.clone(), dyn_backend.clone(), queue.clone());
        let orchestrator = ChordOrchestrator::new(dyn_backend, dyn_queue, registry.clone(), config);
        Self { backend,
               queue,
               registry,
               worker,
               orchestrator }
    }
}
