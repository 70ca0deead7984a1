// Archivo: watcher.rs
// Propósito: el watcher del chord (`chord.unlock`), una tarea que se
// re-encola a sí misma hasta que el grupo termina y entonces despacha el
// callback o marca el chord como fallido.
//
// Máquina de estados: POLLING -> {DISPATCHED, FAILED}; POLLING -> POLLING es
// el reintento. Cada invocación hace exactamente una comprobación y no
// guarda estado en memoria: todo se relee del backend.
use crate::backend::ResultBackend;
use crate::canvas::Signature;
use crate::config::{ChordConfig, ResolvedOptions};
use crate::domain::{ChordDescriptor, ChordErrorReport, ChordOptions, ChordStatus, GroupId, TaskError, TaskId};
use crate::errors::{ChordError, Result};
use crate::group::GroupResult;
use crate::queue::TaskQueue;
use crate::task::{Task, TaskContext, TaskFailure, TaskRequest, TaskResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use std::time::Duration;

/// Nombre con el que se registra el watcher.
pub const UNLOCK_TASK: &str = "chord.unlock";

/// Argumentos de una invocación del watcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnlockArgs {
    pub chord_id: TaskId,
    pub group_id: GroupId,
    /// Callback congelado: `options.task_id == chord_id`.
    pub callback: Signature,
    pub members: Vec<TaskId>,
    #[serde(default)]
    pub options: ChordOptions,
}

impl UnlockArgs {
    /// Congela una copia del callback; su id pasa a ser el id del chord.
    pub fn new(group_id: GroupId, callback: &Signature, members: Vec<TaskId>, options: ChordOptions) -> Self {
        let callback = callback.frozen();
        let chord_id = callback.id().cloned().unwrap_or_default();
        Self { chord_id,
               group_id,
               callback,
               members,
               options }
    }

    pub fn from_descriptor(descriptor: &ChordDescriptor) -> Self {
        Self::new(descriptor.group.group_id.clone(),
                  &descriptor.callback,
                  descriptor.group.members.clone(),
                  descriptor.options.clone())
    }

    /// Firma encolable de `chord.unlock` con estos argumentos.
    pub fn to_signature(&self) -> Result<Signature> {
        Ok(Signature::with_args(UNLOCK_TASK, vec![serde_json::to_value(self)?]))
    }

    pub fn from_request(request: &TaskRequest) -> Result<Self> {
        let raw = request.args
                         .first()
                         .cloned()
                         .ok_or_else(|| ChordError::NotFound(format!("{} sin argumentos", UNLOCK_TASK)))?;
        Ok(serde_json::from_value(raw)?)
    }
}

/// Resultado de una invocación del watcher.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchOutcome {
    /// El callback se encoló con este id.
    Dispatched { callback_id: TaskId },
    /// El chord falló y el reporte quedó registrado.
    Failed(ChordErrorReport),
    /// Grupo no listo, o su lectura falló: la invocación se re-encoló.
    Retrying { countdown: Duration },
    /// Otra invocación ya llevó el chord a un estado terminal.
    AlreadyFinished(ChordStatus),
}

impl WatchOutcome {
    pub fn to_json(&self) -> JsonValue {
        match self {
            WatchOutcome::Dispatched { callback_id } => json!({"status": "DISPATCHED", "callback_id": callback_id}),
            WatchOutcome::Failed(report) => json!({"status": "FAILED", "culprit_id": report.culprit_id, "message": report.message}),
            WatchOutcome::Retrying { countdown } => json!({"status": "POLLING", "countdown": countdown.as_secs_f64()}),
            WatchOutcome::AlreadyFinished(status) => json!({"status": status}),
        }
    }
}

/// Watcher del chord. Backend y cola se inyectan: nada se resuelve desde
/// estado global.
pub struct ChordWatcher {
    backend: Arc<dyn ResultBackend>,
    queue: Arc<dyn TaskQueue>,
    config: ChordConfig,
}

impl ChordWatcher {
    pub fn new(backend: Arc<dyn ResultBackend>, queue: Arc<dyn TaskQueue>, config: ChordConfig) -> Self {
        Self { backend,
               queue,
               config }
    }

    pub fn config(&self) -> &ChordConfig {
        &self.config
    }

    /// Una comprobación de readiness.
    ///
    /// Un grupo no listo y un error del backend al comprobarlo re-encolan
    /// la invocación con el mismo presupuesto; sólo el agotamiento de
    /// reintentos sale como `Err`. Los fallos de miembros y de despacho
    /// terminan en `WatchOutcome::Failed`.
    pub fn check(&self, request: &TaskRequest, args: &UnlockArgs) -> Result<WatchOutcome> {
        let opts = self.config.resolve(&args.options);

        match self.backend.chord_status(&args.chord_id) {
            Ok(Some(status)) if status.is_terminal() => {
                log::debug!("chord {} ya terminado ({:?}), nada que hacer", args.chord_id, status);
                return Ok(WatchOutcome::AlreadyFinished(status));
            }
            Ok(_) => {}
            Err(e) => return self.reschedule(request, args, &opts, e),
        }

        let group = GroupResult::new(self.backend.as_ref(), args.group_id.clone(), args.members.clone());
        if let Err(e) = group.ensure_ready() {
            return self.reschedule(request, args, &opts, e);
        }

        match group.collect(opts.propagate, Some(opts.join_timeout)) {
            Ok(values) => self.dispatch(args, values),
            Err(err) => {
                let report = summarize_failure(err, group.failed_report());
                self.fail(&args.chord_id, report, false)
            }
        }
    }

    fn reschedule(&self,
                  request: &TaskRequest,
                  args: &UnlockArgs,
                  opts: &ResolvedOptions,
                  cause: ChordError)
                  -> Result<WatchOutcome> {
        match cause {
            ChordError::NotReady(_) => log::debug!("chord {}: grupo {} no listo, reintento {} en {:?}",
                                                   args.chord_id,
                                                   args.group_id,
                                                   request.retries + 1,
                                                   opts.interval),
            other => log::warn!("chord {}: error leyendo el grupo {} ({}), reintento {} en {:?}",
                                args.chord_id,
                                args.group_id,
                                other,
                                request.retries + 1,
                                opts.interval),
        }
        self.queue.retry(request, opts.interval, opts.max_retries)?;
        Ok(WatchOutcome::Retrying { countdown: opts.interval })
    }

    fn dispatch(&self, args: &UnlockArgs, values: Vec<JsonValue>) -> Result<WatchOutcome> {
        if !self.backend.mark_dispatched(&args.chord_id)? {
            log::debug!("chord {}: otro watcher ya despachó el callback", args.chord_id);
            return Ok(WatchOutcome::AlreadyFinished(ChordStatus::Dispatched));
        }

        let mut callback = args.callback.partial(vec![JsonValue::Array(values)]);
        callback.options.task_id.get_or_insert_with(|| args.chord_id.clone());

        match self.queue.enqueue(&callback, None) {
            Ok(callback_id) => {
                log::info!("chord {}: callback {} despachado", args.chord_id, callback.task);
                Ok(WatchOutcome::Dispatched { callback_id })
            }
            Err(e) => {
                let wrapped = ChordError::Dispatch(e.to_string());
                let report = ChordErrorReport::callback(args.chord_id.clone(), wrapped.to_string());
                self.fail(&args.chord_id, report, true)
            }
        }
    }

    /// Registra el fallo. `claimed` indica que esta invocación ganó
    /// `mark_dispatched` y el fallo viene del encolado del callback.
    fn fail(&self, chord_id: &TaskId, report: ChordErrorReport, claimed: bool) -> Result<WatchOutcome> {
        let recorded = if claimed {
            self.backend.fail_dispatch(chord_id, &report)?
        } else {
            self.backend.fail_chord(chord_id, &report)?
        };
        if !recorded {
            let status = self.backend.chord_status(chord_id)?.unwrap_or(ChordStatus::Failed);
            log::debug!("chord {} ya terminado ({:?}), se descarta el fallo: {}", chord_id, status, report.message);
            return Ok(WatchOutcome::AlreadyFinished(status));
        }
        log::warn!("chord {} falló: {}", chord_id, report.message);
        Ok(WatchOutcome::Failed(report))
    }
}

/// Construye el reporte de fallo a partir del error del join.
///
/// El culpable es el miembro que el join reportó (primero en orden de
/// definición). Si el join no sabe qué miembro produjo el error se usa la
/// primera entrada de `failed`; si no hay ninguna, `"unknown"`.
pub fn summarize_failure<I>(err: ChordError, failed: I) -> ChordErrorReport
    where I: Iterator<Item = (TaskId, TaskError)>
{
    let exceptions: Vec<(TaskId, TaskError)> = failed.collect();
    let fallback = || {
        exceptions.first()
                  .map(|(id, _)| id.clone())
                  .unwrap_or_else(TaskId::unknown)
    };
    let (culprit, error) = match err {
        ChordError::MemberFailed { origin: Some(id), error } => (id, error),
        ChordError::MemberFailed { origin: None, error } => (fallback(), error),
        other => (fallback(), other.to_task_error()),
    };
    ChordErrorReport::dependency(culprit, &error, exceptions)
}

/// `chord.unlock` como tarea registrable.
pub struct ChordUnlockTask {
    watcher: Arc<ChordWatcher>,
}

impl ChordUnlockTask {
    pub fn new(watcher: Arc<ChordWatcher>) -> Self {
        Self { watcher }
    }
}

impl Task for ChordUnlockTask {
    fn name(&self) -> &str {
        UNLOCK_TASK
    }

    fn run(&self, ctx: &TaskContext) -> TaskResult {
        let args = UnlockArgs::from_request(&ctx.request)?;
        match self.watcher.check(&ctx.request, &args)? {
            WatchOutcome::Retrying { countdown } => Err(TaskFailure::Retry { countdown }),
            outcome => Ok(outcome.to_json()),
        }
    }
}
