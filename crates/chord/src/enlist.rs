// Archivo: enlist.rs
// Propósito: enlistamiento dinámico. Un miembro en ejecución agrega trabajo
// a su propio chord antes de terminar, de modo que el barrier espere
// también por ese trabajo.
use crate::canvas::Signature;
use crate::domain::ResultHandle;
use crate::errors::{ChordError, Result};
use crate::task::TaskContext;

/// Resultado de un enlistamiento.
#[derive(Debug, Clone)]
pub struct Enlisted {
    /// Firma congelada con `task_id`, `group_id` y `chord` asignados.
    pub signature: Signature,
    /// Handle pendiente del nuevo miembro.
    pub handle: ResultHandle,
    /// `false` si el enlistamiento fue perezoso y el llamador debe encolar.
    pub scheduled: bool,
}

/// Registra `signature` como miembro adicional del chord de `ctx`.
///
/// El backend incrementa el tamaño esperado y agrega el miembro antes de
/// que esta función retorne, y antes de encolar la nueva tarea. Fuera de
/// un miembro de chord devuelve `ChordError::Membership` sin tocar nada.
pub fn enlist(ctx: &TaskContext, signature: Signature, lazy: bool) -> Result<Enlisted> {
    let request = &ctx.request;
    let (group_id, callback) = match (&request.group_id, &request.chord) {
        (Some(g), Some(c)) => (g, c),
        _ => {
            return Err(ChordError::Membership(format!("la tarea {} ({}) no forma parte de un chord",
                                                      request.id, request.task)))
        }
    };

    let mut sig = signature;
    sig.link_chord(group_id, callback);
    let task_id = sig.freeze();
    let size = ctx.backend.add_to_chord(group_id, &task_id)?;
    log::debug!("chord {}: {} enlistada por {}, tamaño {}", group_id, task_id, request.id, size);

    if !lazy {
        ctx.queue.enqueue(&sig, None)?;
    }

    Ok(Enlisted { signature: sig,
                  handle: ResultHandle::pending(task_id),
                  scheduled: !lazy })
}
