// Archivo: size.rs
// Propósito: `SizeTracker`, el conteo de miembros esperados y completados
// por chord. Los miembros reportan su propia finalización; el watcher sólo
// lee.
use crate::backend::ResultBackend;
use crate::domain::GroupId;
use crate::errors::Result;

pub struct SizeTracker<'a> {
    backend: &'a dyn ResultBackend,
}

impl<'a> SizeTracker<'a> {
    pub fn new(backend: &'a dyn ResultBackend) -> Self {
        Self { backend }
    }

    /// `true` si el backend ofrece contadores atómicos.
    pub fn is_native(&self) -> bool {
        self.backend.supports_native_counting()
    }

    /// Fija el tamaño inicial. Una sola vez por chord, al crearlo.
    pub fn set_expected_size(&self, group_id: &GroupId, size: usize) -> Result<()> {
        log::debug!("chord {}: tamaño esperado {}", group_id, size);
        self.backend.set_expected_size(group_id, size)
    }

    pub fn expected_size(&self, group_id: &GroupId) -> Result<Option<usize>> {
        self.backend.expected_size(group_id)
    }

    pub fn completed_count(&self, group_id: &GroupId) -> Result<usize> {
        self.backend.completed_count(group_id)
    }

    /// Lo invoca cada miembro al terminar, después de guardar su
    /// resultado. Devuelve el nuevo conteo, o `None` si el backend no
    /// cuenta.
    pub fn on_member_complete(&self, group_id: &GroupId) -> Result<Option<usize>> {
        if !self.is_native() {
            return Ok(None);
        }
        let done = self.backend.increment_completed(group_id)?;
        log::debug!("chord {}: {} miembros completados", group_id, done);
        Ok(Some(done))
    }

    /// Readiness rápida: `Some(completed >= expected)` con contadores
    /// nativos y tamaño conocido, `None` si hay que recorrer los handles.
    ///
    /// El conteo de completados se lee antes que el tamaño esperado: un
    /// miembro incrementa el tamaño antes de completar, así que un
    /// completado visible implica que su enlistamiento también lo es.
    pub fn is_complete(&self, group_id: &GroupId) -> Result<Option<bool>> {
        if !self.is_native() {
            return Ok(None);
        }
        let completed = self.completed_count(group_id)?;
        Ok(self.expected_size(group_id)?.map(|expected| completed >= expected))
    }
}
