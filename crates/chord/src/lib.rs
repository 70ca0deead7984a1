//! Crate `chord`: barrier de unión (chord) para colas de tareas
//!
//! Un chord es un grupo de tareas (la cabecera) más un callback (el cuerpo)
//! que se ejecuta una sola vez, con la lista ordenada de resultados del
//! grupo como primer argumento, cuando todos los miembros terminaron.
//!
//! Este crate define los tipos de dominio (`TaskId`, `ChordDescriptor`,
//! `ChordErrorReport`), los contratos `ResultBackend` y `TaskQueue`, el
//! watcher `chord.unlock` que sondea el grupo y despacha el callback, el
//! enlistamiento dinámico de miembros y un runtime en memoria útil para
//! pruebas (`stubs`).
//!
//! Diseño resumido:
//! - El watcher no guarda estado: cada invocación relee el backend y, si el
//!   grupo no está listo, se re-encola a sí misma.
//! - Exactamente una vez: las transiciones terminales del chord
//!   (`mark_dispatched`, `fail_chord`, `fail_dispatch`) son compare-and-set
//!   en el backend.
//! - Un miembro puede agregar trabajo a su propio chord antes de terminar;
//!   el tamaño esperado crece antes de que el nuevo miembro pueda completar.
//!
//! Ejemplo rápido:
//! ```rust
//! use chord::stubs::InMemoryRuntime;
//! use chord::{task_fn, Chord, ChordConfig, Signature, TaskRegistry};
//! use serde_json::json;
//!
//! let mut registry = TaskRegistry::new();
//! registry.register(task_fn("double", |ctx| Ok(json!(ctx.arg_i64(0)? * 2))));
//! registry.register(task_fn("sum", |ctx| {
//!     let values = ctx.args()[0].as_array().cloned().unwrap_or_default();
//!     Ok(json!(values.iter().filter_map(|v| v.as_i64()).sum::<i64>()))
//! }));
//! let rt = InMemoryRuntime::new(ChordConfig::default(), registry);
//!
//! let header: Vec<Signature> = (1..=3).map(|i| Signature::with_args("double", vec![json!(i)])).collect();
//! let result = rt.orchestrator.apply(&Chord::new(header, Signature::new("sum")), None).unwrap();
//! rt.worker.run_until_idle(100).unwrap();
//! assert_eq!(result.get(None).unwrap(), json!(12));
//! ```
pub mod backend;
pub mod canvas;
pub mod config;
pub mod domain;
pub mod enlist;
pub mod errors;
pub mod group;
pub mod orchestrator;
pub mod queue;
pub mod result;
pub mod size;
pub mod stubs;
pub mod task;
pub mod watcher;

pub use backend::*;
pub use canvas::*;
pub use config::*;
pub use domain::*;
pub use enlist::*;
pub use errors::*;
pub use group::*;
pub use orchestrator::*;
pub use queue::*;
pub use result::*;
pub use size::*;
pub use task::*;
pub use watcher::*;
