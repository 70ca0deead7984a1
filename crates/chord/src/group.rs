// Archivo: group.rs
// Propósito: `GroupResult`, la vista de un grupo sobre el backend:
// comprobación de readiness, recolección ordenada y reporte de miembros
// fallidos.
use crate::backend::ResultBackend;
use crate::domain::{GroupId, Joined, TaskError, TaskId, TaskOutcome};
use crate::errors::{ChordError, Result};
use crate::size::SizeTracker;
use serde_json::Value as JsonValue;
use std::time::Duration;

/// Grupo ligado a un backend. No guarda estado entre invocaciones: cada
/// consulta vuelve a leer el backend.
pub struct GroupResult<'a> {
    backend: &'a dyn ResultBackend,
    group_id: GroupId,
    /// Miembros conocidos por el llamador; se usan si el backend no tiene
    /// el grupo registrado.
    fallback: Vec<TaskId>,
}

impl<'a> GroupResult<'a> {
    pub fn new(backend: &'a dyn ResultBackend, group_id: GroupId, members: Vec<TaskId>) -> Self {
        Self { backend,
               group_id,
               fallback: members }
    }

    pub fn id(&self) -> &GroupId {
        &self.group_id
    }

    /// Miembros actuales en orden de definición, incluyendo los
    /// enlistados después de la creación.
    pub fn members(&self) -> Result<Vec<TaskId>> {
        Ok(self.backend
               .group_members(&self.group_id)?
               .unwrap_or_else(|| self.fallback.clone()))
    }

    /// `true` si todos los miembros terminaron.
    ///
    /// Con contadores nativos es una sola consulta (`completed >= expected`).
    /// Sin ellos se recorren los handles; la lista de miembros se lee antes
    /// y después del recorrido y un crecimiento cuenta como "no listo": un
    /// miembro agrega trabajo antes de completar, así que un enlistamiento
    /// concurrente siempre queda visible en la segunda lectura.
    pub fn ready(&self) -> Result<bool> {
        if let Some(done) = SizeTracker::new(self.backend).is_complete(&self.group_id)? {
            return Ok(done);
        }
        let members = self.members()?;
        for id in &members {
            if !self.backend.get_handle(id)?.is_ready() {
                return Ok(false);
            }
        }
        Ok(self.members()?.len() == members.len())
    }

    /// Igual que `ready` pero como error interno `NotReady`.
    pub fn ensure_ready(&self) -> Result<()> {
        if self.ready()? {
            Ok(())
        } else {
            Err(ChordError::NotReady(self.group_id.to_string()))
        }
    }

    /// Valores en orden de definición. Con `propagate` el primer miembro
    /// fallido en ese orden se devuelve como `ChordError::MemberFailed`.
    /// `timeout` acota la espera del join.
    pub fn collect(&self, propagate: bool, timeout: Option<Duration>) -> Result<Vec<JsonValue>> {
        let members = self.members()?;
        let joined = self.backend.join(&members, timeout)?;
        aggregate(joined, propagate)
    }

    /// Miembros fallidos (o revocados) en orden, sin propagar sus errores.
    /// Perezoso: cada handle se lee al avanzar el iterador.
    pub fn failed_report(&self) -> impl Iterator<Item = (TaskId, TaskError)> + '_ {
        let members = self.members().unwrap_or_else(|e| {
                                        log::debug!("failed_report: sin miembros para {}: {}", self.group_id, e);
                                        Vec::new()
                                    });
        members.into_iter().filter_map(move |id| match self.backend.get_handle(&id) {
                                           Ok(h) => match h.outcome {
                                               TaskOutcome::Failure(e) => Some((id, e)),
                                               TaskOutcome::Revoked => {
                                                   let e = TaskError::revoked(&id);
                                                   Some((id, e))
                                               }
                                               _ => None,
                                           },
                                           Err(e) => {
                                               log::debug!("failed_report: no se pudo leer {}: {}", id, e);
                                               None
                                           }
                                       })
    }
}

/// Convierte los resultados de un join en la lista ordenada de valores.
/// Es la misma regla para el modo distribuido y el modo eager.
pub fn aggregate(joined: Vec<Joined>, propagate: bool) -> Result<Vec<JsonValue>> {
    let mut values = Vec::with_capacity(joined.len());
    for item in joined {
        let error = match item.outcome {
            TaskOutcome::Success(v) => {
                values.push(v);
                continue;
            }
            TaskOutcome::Failure(e) => e,
            TaskOutcome::Revoked => {
                let origin = item.origin.clone().unwrap_or_else(TaskId::unknown);
                TaskError::revoked(&origin)
            }
            TaskOutcome::Pending => {
                return Err(ChordError::Backend(format!("join devolvió un miembro pendiente ({:?})", item.origin)));
            }
        };
        if propagate {
            return Err(ChordError::MemberFailed { origin: item.origin,
                                                  error });
        }
        values.push(serde_json::to_value(&error)?);
    }
    Ok(values)
}
