// Archivo: orchestrator.rs
// Propósito: implementar `ChordOrchestrator`, la capa de entrada que arma
// el descriptor del chord a partir de un grupo y un callback, registra el
// chord en el backend, encola los miembros y la primera invocación del
// watcher. En modo eager ejecuta todo en línea.
use crate::backend::ResultBackend;
use crate::canvas::{Chord, Signature};
use crate::config::ChordConfig;
use crate::domain::{ChordDescriptor, GroupDescriptor, Joined, TaskId, TaskOutcome};
use crate::errors::{ChordError, Result};
use crate::group::aggregate;
use crate::queue::TaskQueue;
use crate::result::AsyncResult;
use crate::size::SizeTracker;
use crate::task::{TaskContext, TaskFailure, TaskRegistry, TaskRequest};
use crate::watcher::{summarize_failure, UnlockArgs};
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Descriptor listo para lanzar más las firmas congeladas de sus miembros,
/// en orden de definición.
#[derive(Debug, Clone)]
pub struct ChordPlan {
    pub descriptor: ChordDescriptor,
    pub members: Vec<Signature>,
}

/// Servicio de alto nivel para lanzar chords.
///
/// Backend, cola y registro se inyectan en el constructor; el registro
/// sólo se usa en modo eager.
pub struct ChordOrchestrator {
    backend: Arc<dyn ResultBackend>,
    queue: Arc<dyn TaskQueue>,
    registry: Arc<TaskRegistry>,
    config: ChordConfig,
}

impl ChordOrchestrator {
    pub fn new(backend: Arc<dyn ResultBackend>,
               queue: Arc<dyn TaskQueue>,
               registry: Arc<TaskRegistry>,
               config: ChordConfig)
               -> Self {
        Self { backend,
               queue,
               registry,
               config }
    }

    pub fn config(&self) -> &ChordConfig {
        &self.config
    }

    /// Arma el descriptor: aplana los grupos anidados (el tamaño cuenta
    /// hojas), asigna ids a los miembros y al grupo y congela una copia
    /// del callback. El `Chord` del llamador no se modifica.
    ///
    /// `task_id`, si se pasa, es el id del chord (y del callback).
    pub fn build(&self, chord: &Chord, task_id: Option<TaskId>) -> ChordPlan {
        let mut callback = chord.body.clone();
        if let Some(id) = task_id {
            callback.options.task_id = Some(id);
        }
        for (k, v) in &chord.kwargs {
            callback.kwargs.entry(k.clone()).or_insert_with(|| v.clone());
        }
        let chord_id = callback.freeze();

        let group_id = TaskId::new();
        let members: Vec<Signature> = chord.header
                                           .leaves()
                                           .into_iter()
                                           .map(|leaf| {
                                               let mut sig = leaf.frozen();
                                               sig.link_chord(&group_id, &callback);
                                               sig
                                           })
                                           .collect();
        let ids: Vec<TaskId> = members.iter().filter_map(|s| s.id().cloned()).collect();

        let descriptor = ChordDescriptor { chord_id,
                                           size: chord.size(),
                                           group: GroupDescriptor::new(group_id, ids),
                                           callback,
                                           options: chord.options.clone() };
        ChordPlan { descriptor, members }
    }

    /// Lanza un plan ya construido.
    ///
    /// Orden: registro del chord, tamaño esperado (una sola vez), miembros
    /// y por último una invocación del watcher con `countdown = interval`.
    pub fn run(&self, plan: ChordPlan) -> Result<AsyncResult> {
        if self.config.always_eager {
            return self.run_eager(plan);
        }
        let descriptor = &plan.descriptor;
        let group_id = &descriptor.group.group_id;

        if !self.backend.apply_chord(descriptor)? {
            log::debug!("chord {} ya registrado", descriptor.chord_id);
        }
        SizeTracker::new(self.backend.as_ref()).set_expected_size(group_id, descriptor.size)?;

        for member in &plan.members {
            self.queue.enqueue(member, None)?;
        }

        let opts = self.config.resolve(&descriptor.options);
        let unlock = UnlockArgs::from_descriptor(descriptor).to_signature()?;
        self.queue.enqueue(&unlock, Some(opts.interval))?;

        log::info!("chord {} lanzado: grupo {} con {} miembros",
                   descriptor.chord_id,
                   group_id,
                   descriptor.size);
        Ok(AsyncResult::new(descriptor.chord_id.clone(), self.backend.clone()))
    }

    /// `build` + `run`.
    pub fn apply(&self, chord: &Chord, task_id: Option<TaskId>) -> Result<AsyncResult> {
        let plan = self.build(chord, task_id);
        self.run(plan)
    }

    /// Modo eager: miembros y callback corren en línea, en orden, sin
    /// backend ni reintentos. Las reglas de agregación y de fallo son las
    /// mismas que en el modo distribuido.
    fn run_eager(&self, plan: ChordPlan) -> Result<AsyncResult> {
        let descriptor = plan.descriptor;
        let opts = self.config.resolve(&descriptor.options);

        let mut joined = Vec::with_capacity(plan.members.len());
        for member in &plan.members {
            let outcome = self.execute_inline(member)?;
            joined.push(Joined { origin: member.id().cloned(),
                                 outcome });
        }

        let outcome = match aggregate(joined.clone(), opts.propagate) {
            Ok(values) => self.execute_inline(&descriptor.callback.partial(vec![JsonValue::Array(values)]))?,
            Err(err) => {
                let failed = joined.into_iter().filter_map(|j| match (j.origin, j.outcome) {
                                                   (Some(id), TaskOutcome::Failure(e)) => Some((id, e)),
                                                   _ => None,
                                               });
                let report = summarize_failure(err, failed);
                log::warn!("chord {} falló (eager): {}", descriptor.chord_id, report.message);
                TaskOutcome::Failure(ChordError::ChordFailure(report).to_task_error())
            }
        };
        Ok(AsyncResult::eager(descriptor.chord_id, outcome, self.backend.clone()))
    }

    /// Ejecuta una firma en el hilo actual. La petición no lleva grupo ni
    /// chord: el enlistamiento no está disponible en modo eager. Un
    /// reintento no pasa por la cola: la tarea se repite en el acto hasta
    /// terminar o agotar su presupuesto.
    fn execute_inline(&self, sig: &Signature) -> Result<TaskOutcome> {
        let task = self.registry.get(&sig.task)?;
        let mut request = TaskRequest::from_signature(sig, 0);
        request.group_id = None;
        request.chord = None;
        loop {
            let ctx = TaskContext::new(request.clone(), self.backend.clone(), self.queue.clone()).inline();
            match task.run(&ctx) {
                Ok(v) => return Ok(TaskOutcome::Success(v)),
                Err(TaskFailure::Error(e)) => return Ok(TaskOutcome::Failure(e)),
                Err(TaskFailure::Retry { .. }) => {
                    request.retries += 1;
                    log::debug!("{} ({}) reintento en línea {}", request.task, request.id, request.retries);
                }
            }
        }
    }
}
