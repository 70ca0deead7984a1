#![allow(dead_code)]

use chord::stubs::{InMemoryBackend, InMemoryQueue};
use chord::{task_fn, ChordDescriptor, ChordError, ChordErrorReport, ChordStatus, GroupId, Joined, ResultBackend,
            ResultHandle, Signature, SizeTracker, TaskError, TaskId, TaskOutcome, TaskQueue, TaskRegistry,
            TaskRequest};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Registro con las tareas usadas por las pruebas.
pub fn registry() -> TaskRegistry {
  let mut r = TaskRegistry::new();
  r.register(task_fn("add", |ctx| Ok(json!(ctx.arg_i64(0)? + ctx.arg_i64(1)?))));
  r.register(task_fn("tsum", |ctx| {
     let values = ctx.args().first().and_then(|v| v.as_array()).cloned().unwrap_or_default();
     Ok(json!(values.iter().filter_map(|v| v.as_i64()).sum::<i64>()))
   }));
  r.register(task_fn("collect", |ctx| Ok(ctx.args().first().cloned().unwrap_or(json!(null)))));
  r.register(task_fn("fail", |_ctx| Err(TaskError::new("KeyError", "foo").into())));
  // Error de dominio cuyo tipo coincide con el nombre de la señal de reintento.
  r.register(task_fn("domain_retry", |_ctx| Err(TaskError::new("Retry", "saldo insuficiente").into())));
  // Pide reintento hasta su tercera ejecución; el argumento es el presupuesto.
  r.register(task_fn("flaky", |ctx| {
     let max = ctx.arg_i64(0)? as u32;
     if ctx.request.retries < 2 {
       return Err(ctx.retry(Duration::from_millis(5), Some(max)));
     }
     Ok(json!(ctx.request.retries))
   }));
  r.register(task_fn("slow_add", |ctx| {
     let x = ctx.arg_i64(0)?;
     std::thread::sleep(Duration::from_millis((10 - x.rem_euclid(10)) as u64));
     Ok(json!(x + ctx.arg_i64(1)?))
   }));
  r.register(task_fn("fan_out", |ctx| {
     let n = ctx.arg_i64(0)?;
     ctx.add_to_chord(Signature::with_args("add", vec![json!(n), json!(n)]), false)
        .map_err(|e| e.to_task_error())?;
     Ok(json!(n))
   }));
  r.register(task_fn("countdown", |ctx| {
     let n = ctx.arg_i64(0)?;
     if n > 0 {
       ctx.add_to_chord(Signature::with_args("countdown", vec![json!(n - 1)]), false)
          .map_err(|e| e.to_task_error())?;
     }
     Ok(json!(n))
   }));
  r
}

pub fn add(x: i64, y: i64) -> Signature {
  Signature::with_args("add", vec![json!(x), json!(y)])
}

/// Guarda el resultado de un miembro y reporta su finalización, como lo
/// hace el worker.
pub fn complete(backend: &dyn ResultBackend, group_id: &GroupId, id: &TaskId, outcome: TaskOutcome) {
  if backend.store_result(id, outcome).expect("store") {
    SizeTracker::new(backend).on_member_complete(group_id).expect("count");
  }
}

/// Petición de la primera invocación de `chord.unlock` para `sig`.
pub fn unlock_request(sig: &Signature) -> TaskRequest {
  TaskRequest::from_signature(&sig.frozen(), 0)
}

/// Backend que envuelve `InMemoryBackend`, registra llamadas y puede
/// simular fallas de lectura.
pub struct RecordingBackend {
  pub inner: InMemoryBackend,
  pub apply_chord_calls: AtomicUsize,
  pub set_expected_calls: Mutex<Vec<(GroupId, usize)>>,
  pub join_timeouts: Mutex<Vec<Option<Duration>>>,
  pub fail_reads: AtomicBool,
  pub fail_join: AtomicBool,
  /// La próxima lectura de `chord_status` responde `POLLING` aunque el
  /// chord ya haya terminado, como lo vería un watcher que leyó antes de
  /// la transición.
  pub stale_status: AtomicBool,
}

impl RecordingBackend {
  pub fn new(inner: InMemoryBackend) -> Self {
    Self { inner,
           apply_chord_calls: AtomicUsize::new(0),
           set_expected_calls: Mutex::new(Vec::new()),
           join_timeouts: Mutex::new(Vec::new()),
           fail_reads: AtomicBool::new(false),
           fail_join: AtomicBool::new(false),
           stale_status: AtomicBool::new(false) }
  }

  fn check_reads(&self) -> chord::Result<()> {
    if self.fail_reads.load(Ordering::SeqCst) {
      return Err(ChordError::Backend("conexión perdida".into()));
    }
    Ok(())
  }
}

impl ResultBackend for RecordingBackend {
  fn get_handle(&self, id: &TaskId) -> chord::Result<ResultHandle> {
    self.check_reads()?;
    self.inner.get_handle(id)
  }

  fn store_result(&self, id: &TaskId, outcome: TaskOutcome) -> chord::Result<bool> {
    self.inner.store_result(id, outcome)
  }

  fn join(&self, ids: &[TaskId], timeout: Option<Duration>) -> chord::Result<Vec<Joined>> {
    self.join_timeouts.lock().unwrap().push(timeout);
    if self.fail_join.load(Ordering::SeqCst) {
      return Err(ChordError::Backend("join roto".into()));
    }
    self.inner.join(ids, timeout)
  }

  fn supports_native_counting(&self) -> bool {
    self.inner.supports_native_counting()
  }

  fn set_expected_size(&self, group_id: &GroupId, size: usize) -> chord::Result<()> {
    self.set_expected_calls.lock().unwrap().push((group_id.clone(), size));
    self.inner.set_expected_size(group_id, size)
  }

  fn expected_size(&self, group_id: &GroupId) -> chord::Result<Option<usize>> {
    self.inner.expected_size(group_id)
  }

  fn increment_completed(&self, group_id: &GroupId) -> chord::Result<usize> {
    self.inner.increment_completed(group_id)
  }

  fn completed_count(&self, group_id: &GroupId) -> chord::Result<usize> {
    self.check_reads()?;
    self.inner.completed_count(group_id)
  }

  fn apply_chord(&self, descriptor: &ChordDescriptor) -> chord::Result<bool> {
    self.apply_chord_calls.fetch_add(1, Ordering::SeqCst);
    self.inner.apply_chord(descriptor)
  }

  fn group_members(&self, group_id: &GroupId) -> chord::Result<Option<Vec<TaskId>>> {
    self.check_reads()?;
    self.inner.group_members(group_id)
  }

  fn add_to_chord(&self, group_id: &GroupId, task_id: &TaskId) -> chord::Result<usize> {
    self.inner.add_to_chord(group_id, task_id)
  }

  fn chord_status(&self, chord_id: &TaskId) -> chord::Result<Option<ChordStatus>> {
    if self.stale_status.swap(false, Ordering::SeqCst) {
      return Ok(Some(ChordStatus::Polling));
    }
    self.inner.chord_status(chord_id)
  }

  fn mark_dispatched(&self, chord_id: &TaskId) -> chord::Result<bool> {
    self.inner.mark_dispatched(chord_id)
  }

  fn fail_chord(&self, chord_id: &TaskId, report: &ChordErrorReport) -> chord::Result<bool> {
    self.inner.fail_chord(chord_id, report)
  }

  fn fail_dispatch(&self, chord_id: &TaskId, report: &ChordErrorReport) -> chord::Result<bool> {
    self.inner.fail_dispatch(chord_id, report)
  }
}

/// Cola que rechaza las firmas de una tarea dada y delega el resto.
pub struct RejectingQueue {
  pub inner: Arc<InMemoryQueue>,
  pub reject_task: String,
}

impl TaskQueue for RejectingQueue {
  fn enqueue(&self, signature: &Signature, countdown: Option<Duration>) -> chord::Result<TaskId> {
    if signature.task == self.reject_task {
      return Err(ChordError::Queue("broker no disponible".into()));
    }
    self.inner.enqueue(signature, countdown)
  }

  fn retry(&self, request: &TaskRequest, countdown: Duration, max_retries: Option<u32>) -> chord::Result<()> {
    self.inner.retry(request, countdown, max_retries)
  }
}
