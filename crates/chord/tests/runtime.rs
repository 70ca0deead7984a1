mod common;

use chord::stubs::{InMemoryBackend, InMemoryRuntime};
use chord::{Chord, ChordConfig, ChordError, ChordStatus, ResultBackend, Signature, TaskOutcome, TaskState,
            UNLOCK_TASK};
use common::add;
use serde_json::json;
use std::time::Duration;

fn runtime() -> InMemoryRuntime {
  InMemoryRuntime::new(ChordConfig::default(), common::registry())
}

fn count(rt: &InMemoryRuntime, task: &str) -> usize {
  rt.queue
    .history()
    .expect("history")
    .iter()
    .filter(|m| m.signature.task == task)
    .count()
}

#[test]
fn distributed_chord_sums_results() {
  let rt = runtime();
  let chord = Chord::new((0..10).map(|i| add(i, i)).collect::<Vec<_>>(), Signature::new("tsum"));

  let result = rt.orchestrator.apply(&chord, None).expect("apply");
  rt.worker.run_until_idle(100).expect("run");

  assert_eq!(result.get(Some(Duration::from_secs(1))).expect("value"), json!(90));
  assert_eq!(result.state().unwrap(), TaskState::Success);
  assert_eq!(rt.backend.chord_status(result.id()).unwrap(), Some(ChordStatus::Dispatched));
}

#[test]
fn scan_readiness_gives_same_result() {
  let rt = InMemoryRuntime::with_backend(ChordConfig::default(),
                                         common::registry(),
                                         InMemoryBackend::without_native_counting());
  let chord = Chord::new((0..10).map(|i| add(i, i)).collect::<Vec<_>>(), Signature::new("tsum"));

  let result = rt.orchestrator.apply(&chord, None).expect("apply");
  rt.worker.run_until_idle(100).expect("run");
  assert_eq!(result.get(None).expect("value"), json!(90));
}

#[test]
fn failing_member_fails_chord_and_skips_callback() {
  let rt = runtime();
  let chord = Chord::new(vec![add(1, 1), Signature::new("fail"), add(3, 3)], Signature::new("tsum"));
  let plan = rt.orchestrator.build(&chord, None);
  let culprit = plan.members[1].id().cloned().expect("frozen");

  let result = rt.orchestrator.run(plan).expect("run");
  rt.worker.run_until_idle(100).expect("run");

  match result.get(None).expect_err("failure") {
    ChordError::TaskFailed(e) => {
      assert_eq!(e.kind, "ChordError");
      assert_eq!(e.message, format!("Dependency {} raised KeyError(\"foo\")", culprit));
    }
    other => panic!("se esperaba TaskFailed, llegó {:?}", other),
  }
  assert_eq!(count(&rt, "tsum"), 0);
  assert_eq!(rt.backend.chord_status(result.id()).unwrap(), Some(ChordStatus::Failed));
  assert_eq!(rt.backend.chord_report(result.id()).map(|r| r.culprit_id), Some(culprit));
}

#[test]
fn member_error_of_kind_retry_is_stored_and_fails_chord() {
  let rt = runtime();
  let chord = Chord::new(vec![add(1, 1), Signature::new("domain_retry")], Signature::new("tsum"));
  let plan = rt.orchestrator.build(&chord, None);
  let culprit = plan.members[1].id().cloned().expect("frozen");

  let result = rt.orchestrator.run(plan).expect("run");
  rt.worker.run_until_idle(100).expect("run");

  assert_eq!(rt.backend.get_handle(&culprit).unwrap().state(), TaskState::Failure);
  match result.get(None).expect_err("failure") {
    ChordError::TaskFailed(e) => {
      assert_eq!(e.message, format!("Dependency {} raised Retry(\"saldo insuficiente\")", culprit));
    }
    other => panic!("se esperaba TaskFailed, llegó {:?}", other),
  }
  assert_eq!(count(&rt, "tsum"), 0);
}

#[test]
fn member_retry_is_reenqueued_until_it_succeeds() {
  let rt = runtime();
  let chord = Chord::new(vec![Signature::with_args("flaky", vec![json!(5)])], Signature::new("collect"));

  let result = rt.orchestrator.apply(&chord, None).expect("apply");
  rt.worker.run_until_idle(100).expect("run");

  assert_eq!(result.get(None).expect("value"), json!([2]));
  assert_eq!(count(&rt, "flaky"), 3);
}

#[test]
fn watcher_retry_stores_no_result() {
  let rt = runtime();
  let chord = Chord::new(vec![Signature::with_args("fan_out", vec![json!(1)])], Signature::new("tsum"));
  rt.orchestrator.apply(&chord, None).expect("apply");

  // fan_out, luego el watcher con el miembro enlistado todavía pendiente
  rt.worker.run_once().expect("member");
  let outcome = rt.worker.run_once().expect("watcher");
  assert_eq!(outcome, Some(TaskOutcome::Pending));

  let unlock = rt.queue
                 .history()
                 .expect("history")
                 .into_iter()
                 .find(|m| m.signature.task == UNLOCK_TASK)
                 .expect("watcher encolado");
  let unlock_id = unlock.id().cloned().expect("frozen");
  assert_eq!(rt.backend.get_handle(&unlock_id).unwrap().state(), TaskState::Pending);
}

#[test]
fn duplicate_member_delivery_counts_once() {
  let rt = runtime();
  let chord = Chord::new(vec![add(1, 1), add(2, 2)], Signature::new("tsum"));
  let plan = rt.orchestrator.build(&chord, None);
  let group_id = plan.descriptor.group.group_id.clone();
  rt.orchestrator.run(plan).expect("run");

  let first = rt.queue.pop().unwrap().expect("member");
  rt.worker.execute(&first).expect("first delivery");
  rt.worker.execute(&first).expect("second delivery");
  assert_eq!(rt.backend.completed_count(&group_id).unwrap(), 1);
}

#[test]
fn duplicated_watcher_dispatches_once() {
  let rt = runtime();
  let chord = Chord::new(vec![add(1, 1), add(2, 2)], Signature::new("tsum"));
  rt.orchestrator.apply(&chord, None).expect("apply");

  rt.worker.run_once().expect("member 1");
  rt.worker.run_once().expect("member 2");
  let unlock = rt.queue.pop().unwrap().expect("watcher");
  rt.worker.execute(&unlock).expect("first watcher");
  let again = rt.worker.execute(&unlock).expect("second watcher");

  assert_eq!(again, TaskOutcome::Success(json!({"status": "DISPATCHED"})));
  assert_eq!(count(&rt, "tsum"), 1);
}

#[test]
fn exhausted_watcher_budget_is_stored_on_watcher() {
  let rt = runtime();
  let chord = Chord::new(vec![Signature::with_args("fan_out", vec![json!(1)])], Signature::new("tsum")).max_retries(0);
  let result = rt.orchestrator.apply(&chord, None).expect("apply");

  rt.worker.run_once().expect("member");
  let outcome = rt.worker.run_once().expect("watcher");
  match outcome {
    Some(TaskOutcome::Failure(e)) => assert_eq!(e.kind, "MaxRetriesExceededError"),
    other => panic!("se esperaba fallo del watcher, llegó {:?}", other),
  }
  assert_eq!(rt.backend.chord_status(result.id()).unwrap(), Some(ChordStatus::Polling));
}

#[test]
fn parallel_members_keep_definition_order() {
  let rt = runtime();
  let chord = Chord::new((0..20).map(|i| Signature::with_args("slow_add", vec![json!(i), json!(i)]))
                                .collect::<Vec<_>>(),
                         Signature::new("collect"));
  let plan = rt.orchestrator.build(&chord, None);
  let group_id = plan.descriptor.group.group_id.clone();
  let result = rt.orchestrator.run(plan).expect("run");

  rt.worker.run_batch_parallel().expect("batch");
  rt.worker.run_until_idle(100).expect("rest");

  let expected: Vec<_> = (0..20).map(|i| json!(2 * i)).collect();
  assert_eq!(result.get(None).expect("value"), json!(expected));
  assert_eq!(rt.backend.completed_count(&group_id).unwrap(), 20);
}
