use anyhow::Context;
use chord::stubs::InMemoryRuntime;
use chord::{task_fn, Chord, ChordConfig, Signature, TaskError, TaskRegistry};
use serde_json::json;

/// Demo del barrier en memoria.
///
/// Escenarios:
/// 1) Suma de `i + i` para `i` en 0..10, en modo eager y distribuido
/// 2) Un miembro que falla: el callback no corre y el chord reporta al culpable
/// 3) Fan-out dinámico: cada miembro agrega trabajo a su propio chord
fn main() -> anyhow::Result<()> {
    let config = ChordConfig::from_env().context("leyendo configuración CHORD_*")?;

    println!("== Suma (eager) ==");
    let eager = InMemoryRuntime::new(ChordConfig { always_eager: true,
                                                   ..config.clone() },
                                     registry());
    let result = eager.orchestrator.apply(&sum_chord(), None)?;
    println!("resultado: {}", result.get(None)?);

    println!("\n== Suma (distribuido) ==");
    let rt = InMemoryRuntime::new(config.clone(), registry());
    let result = rt.orchestrator.apply(&sum_chord(), None)?;
    let steps = rt.worker.run_until_idle(1_000)?;
    println!("chord {} -> {} ({} mensajes procesados)", result.id(), result.get(None)?, steps);

    println!("\n== Miembro fallido ==");
    let rt = InMemoryRuntime::new(config.clone(), registry());
    let header = vec![add(1, 1), Signature::new("explode"), add(3, 3)];
    let result = rt.orchestrator.apply(&Chord::new(header, Signature::new("tsum")), None)?;
    rt.worker.run_until_idle(1_000)?;
    match result.get(None) {
        Ok(v) => println!("inesperado: {}", v),
        Err(e) => println!("chord fallido: {}", e),
    }
    if let Some(report) = rt.backend.chord_report(result.id()) {
        println!("culpable: {}", report.culprit_id);
    }

    println!("\n== Fan-out dinámico ==");
    let rt = InMemoryRuntime::new(config, registry());
    let header: Vec<Signature> = (1..=3).map(|n| Signature::with_args("fan_out", vec![json!(n)]))
                                        .collect();
    let result = rt.orchestrator.apply(&Chord::new(header, Signature::new("collect")), None)?;
    rt.worker.run_until_idle(1_000)?;
    println!("resultados: {}", result.get(None)?);

    Ok(())
}

fn add(x: i64, y: i64) -> Signature {
    Signature::with_args("add", vec![json!(x), json!(y)])
}

fn sum_chord() -> Chord {
    Chord::new((0..10).map(|i| add(i, i)).collect::<Vec<_>>(), Signature::new("tsum"))
}

fn registry() -> TaskRegistry {
    let mut r = TaskRegistry::new();
    r.register(task_fn("add", |ctx| Ok(json!(ctx.arg_i64(0)? + ctx.arg_i64(1)?))))
     .register(task_fn("tsum", |ctx| {
         let values = ctx.args().first().and_then(|v| v.as_array()).cloned().unwrap_or_default();
         Ok(json!(values.iter().filter_map(|v| v.as_i64()).sum::<i64>()))
     }))
     .register(task_fn("collect", |ctx| Ok(ctx.args().first().cloned().unwrap_or(json!(null)))))
     .register(task_fn("explode", |_ctx| Err(TaskError::new("KeyError", "foo").into())))
     .register(task_fn("fan_out", |ctx| {
         let n = ctx.arg_i64(0)?;
         ctx.add_to_chord(add(n, n), false).map_err(|e| e.to_task_error())?;
         Ok(json!(n))
     }));
    r
}
