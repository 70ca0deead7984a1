// Archivo: backend.rs
// Propósito: definir el contrato `ResultBackend` que el barrier necesita
// del almacén de resultados. El núcleo sólo define el protocolo; las
// implementaciones concretas (Redis, SQL, memoria) viven fuera o en
// `stubs.rs` para pruebas.
use crate::domain::{ChordDescriptor, ChordErrorReport, ChordStatus, GroupId, Joined, ResultHandle, TaskId, TaskOutcome};
use crate::errors::{ChordError, Result};
use std::time::{Duration, Instant};

/// Intervalo entre lecturas del join por defecto.
pub const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Contrato mínimo del backend de resultados.
///
/// Todas las operaciones que marcan un chord (`apply_chord`,
/// `mark_dispatched`, `fail_chord`, `fail_dispatch`) son compare-and-set:
/// con entrega at-least-once dos watchers pueden correr para el mismo chord
/// y sólo uno debe ganar cada transición.
pub trait ResultBackend: Send + Sync {
    /// Estado y valor actual de una tarea. Un id desconocido es `PENDING`.
    fn get_handle(&self, id: &TaskId) -> Result<ResultHandle>;

    /// Guarda el resultado de una tarea. Un estado terminal no se
    /// sobreescribe: devuelve `false` si ya existía uno, así una entrega
    /// duplicada no vuelve a contar como completada.
    fn store_result(&self, id: &TaskId, outcome: TaskOutcome) -> Result<bool>;

    /// Lee los resultados de `ids` en orden, esperando como máximo
    /// `timeout` a que cada uno deje `PENDING`.
    ///
    /// La implementación por defecto itera `get_handle`; un backend puede
    /// hacer una lectura por lotes. Los elementos pueden venir sin
    /// `origin` si el backend no sabe qué id produjo cada valor.
    fn join(&self, ids: &[TaskId], timeout: Option<Duration>) -> Result<Vec<Joined>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            loop {
                let handle = self.get_handle(id)?;
                if handle.is_ready() {
                    out.push(Joined { origin: Some(handle.id),
                                      outcome: handle.outcome });
                    break;
                }
                if let Some(d) = deadline {
                    if Instant::now() >= d {
                        return Err(ChordError::Timeout(format!("join de {}", id)));
                    }
                }
                std::thread::sleep(JOIN_POLL_INTERVAL);
            }
        }
        Ok(out)
    }

    /// Indica si el backend mantiene contadores atómicos por chord.
    fn supports_native_counting(&self) -> bool {
        false
    }

    /// Fija el tamaño esperado del grupo. Se invoca una vez al crear el
    /// chord.
    fn set_expected_size(&self, _group_id: &GroupId, _size: usize) -> Result<()> {
        Ok(())
    }

    /// Tamaño esperado actual (inicial más enlistamientos), si se conoce.
    fn expected_size(&self, _group_id: &GroupId) -> Result<Option<usize>> {
        Ok(None)
    }

    /// Incremento atómico del conteo de miembros completados. Devuelve el
    /// nuevo valor.
    fn increment_completed(&self, group_id: &GroupId) -> Result<usize> {
        Err(ChordError::Backend(format!("el backend no soporta contadores (grupo {})", group_id)))
    }

    /// Conteo actual de miembros completados.
    fn completed_count(&self, _group_id: &GroupId) -> Result<usize> {
        Ok(0)
    }

    /// Registra un chord nuevo. Devuelve `false` si ya estaba registrado.
    fn apply_chord(&self, descriptor: &ChordDescriptor) -> Result<bool>;

    /// Miembros actuales del grupo en orden de definición, si el grupo
    /// está registrado.
    fn group_members(&self, group_id: &GroupId) -> Result<Option<Vec<TaskId>>>;

    /// Agrega un miembro al grupo: incrementa el tamaño esperado y luego
    /// añade el id, de forma atómica. Devuelve el nuevo tamaño esperado.
    fn add_to_chord(&self, group_id: &GroupId, task_id: &TaskId) -> Result<usize>;

    /// Estado del chord, `None` si nunca se registró.
    fn chord_status(&self, chord_id: &TaskId) -> Result<Option<ChordStatus>>;

    /// Transición `POLLING -> DISPATCHED`. Devuelve `true` sólo para el
    /// primer llamador.
    fn mark_dispatched(&self, chord_id: &TaskId) -> Result<bool>;

    /// Transición `POLLING -> FAILED` por un miembro fallido: guarda el
    /// error como resultado del callback. Devuelve `false` si el chord ya
    /// no estaba en `POLLING` (despachado o fallido).
    fn fail_chord(&self, chord_id: &TaskId, report: &ChordErrorReport) -> Result<bool>;

    /// Transición `DISPATCHED -> FAILED` cuando el callback no pudo
    /// encolarse. Sólo la usa el watcher cuyo `mark_dispatched` devolvió
    /// `true`. Devuelve `false` si el chord no estaba en `DISPATCHED`.
    fn fail_dispatch(&self, chord_id: &TaskId, report: &ChordErrorReport) -> Result<bool>;
}
