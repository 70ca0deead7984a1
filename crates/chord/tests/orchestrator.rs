mod common;

use chord::stubs::{InMemoryBackend, InMemoryQueue, InMemoryRuntime};
use chord::{Canvas, Chord, ChordConfig, ChordDescriptor, ChordError, ChordOrchestrator, Signature, TaskId, TaskQueue,
            UNLOCK_TASK};
use common::{add, RecordingBackend};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn recording() -> (Arc<RecordingBackend>, Arc<InMemoryQueue>, ChordOrchestrator) {
  let backend = Arc::new(RecordingBackend::new(InMemoryBackend::new()));
  let queue = Arc::new(InMemoryQueue::new());
  let orch = ChordOrchestrator::new(backend.clone(), queue.clone(), Arc::new(common::registry()), ChordConfig::default());
  (backend, queue, orch)
}

fn eager() -> InMemoryRuntime {
  let config = ChordConfig { always_eager: true,
                             ..ChordConfig::default() };
  InMemoryRuntime::new(config, common::registry())
}

#[test]
fn eager_chord_sums_results_inline() {
  let rt = eager();
  let chord = Chord::new((0..10).map(|i| add(i, i)).collect::<Canvas>(), Signature::new("tsum"));

  let result = rt.orchestrator.apply(&chord, None).expect("apply");
  assert!(result.is_eager());
  assert_eq!(result.get(None).expect("value"), json!(90));
  assert!(rt.queue.history().expect("history").is_empty());
}

#[test]
fn eager_chord_failure_uses_same_report() {
  let rt = eager();
  let chord = Chord::new(vec![add(1, 1), Signature::new("fail"), add(3, 3)], Signature::new("tsum"));

  let err = rt.orchestrator.apply(&chord, None).unwrap().get(None).expect_err("failure");
  match err {
    ChordError::TaskFailed(e) => {
      assert_eq!(e.kind, "ChordError");
      assert!(e.message.starts_with("Dependency "), "{}", e.message);
      assert!(e.message.ends_with("raised KeyError(\"foo\")"), "{}", e.message);
    }
    other => panic!("se esperaba TaskFailed, llegó {:?}", other),
  }
}

#[test]
fn eager_retry_reruns_task_inline() {
  let rt = eager();
  let chord = Chord::new(vec![Signature::with_args("flaky", vec![json!(5)]), add(1, 1)], Signature::new("collect"));

  let result = rt.orchestrator.apply(&chord, None).expect("apply");
  assert_eq!(result.get(None).expect("value"), json!([2, 2]));
  assert!(rt.queue.history().expect("history").is_empty());
}

#[test]
fn eager_retry_stops_at_budget() {
  let rt = eager();
  let chord = Chord::new(vec![Signature::with_args("flaky", vec![json!(1)])], Signature::new("collect"));

  match rt.orchestrator.apply(&chord, None).unwrap().get(None).expect_err("failure") {
    ChordError::TaskFailed(e) => {
      assert_eq!(e.kind, "ChordError");
      assert!(e.message.contains("raised MaxRetriesExceededError"), "{}", e.message);
    }
    other => panic!("se esperaba TaskFailed, llegó {:?}", other),
  }
  assert!(rt.queue.history().expect("history").is_empty());
}

#[test]
fn eager_members_cannot_enlist() {
  let rt = eager();
  let chord = Chord::new(vec![Signature::with_args("fan_out", vec![json!(1)])], Signature::new("tsum"));

  let err = rt.orchestrator.apply(&chord, None).unwrap().get(None).expect_err("failure");
  let message = err.to_string();
  assert!(message.contains("ValueError"), "{}", message);
}

#[test]
fn expected_size_is_set_once_with_leaf_count() {
  let (backend, _queue, orch) = recording();
  let header = Canvas::group(vec![Canvas::from(vec![add(1, 1), add(2, 2)]),
                                  Canvas::from(vec![add(3, 3), add(4, 4), add(5, 5)])]);

  orch.apply(&Chord::new(header, Signature::new("tsum")), None).expect("apply");
  let calls = backend.set_expected_calls.lock().unwrap();
  assert_eq!(calls.len(), 1);
  assert_eq!(calls[0].1, 5);
}

#[test]
fn list_and_group_headers_both_register_chord() {
  let (backend, _queue, orch) = recording();
  let from_list = Chord::new(vec![add(1, 1), add(2, 2)], Signature::new("tsum"));
  let from_group = Chord::new(Canvas::group(vec![add(1, 1), add(2, 2)]), Signature::new("tsum"));

  orch.apply(&from_list, None).expect("list");
  orch.apply(&from_group, None).expect("group");
  assert_eq!(backend.apply_chord_calls.load(Ordering::SeqCst), 2);
}

#[test]
fn callers_chord_is_not_mutated() {
  let (_backend, _queue, orch) = recording();
  let chord = Chord::new(vec![add(1, 1), add(2, 2)], Signature::new("tsum"));
  let before = chord.clone();

  let plan = orch.build(&chord, None);
  assert_eq!(chord, before);
  assert!(chord.body.id().is_none());
  assert!(plan.descriptor.callback.id().is_some());
}

#[test]
fn task_id_becomes_chord_and_callback_id() {
  let rt = InMemoryRuntime::new(ChordConfig::default(), common::registry());
  let chord = Chord::new(vec![add(1, 1)], Signature::new("tsum"));

  let result = rt.orchestrator.apply(&chord, Some(TaskId::from("mi-chord"))).expect("apply");
  assert_eq!(result.id().as_str(), "mi-chord");
  let descriptor = rt.backend.chord_descriptor(&TaskId::from("mi-chord")).expect("registrado");
  assert_eq!(descriptor.callback.id(), Some(&TaskId::from("mi-chord")));
}

#[test]
fn members_are_enqueued_before_watcher_with_interval_countdown() {
  let (_backend, queue, orch) = recording();
  let chord = Chord::new(vec![add(1, 1), add(2, 2), add(3, 3)], Signature::new("tsum")).interval(Duration::from_secs(5));

  let plan = orch.build(&chord, None);
  let group_id = plan.descriptor.group.group_id.clone();
  orch.run(plan).expect("run");

  let history = queue.history().expect("history");
  assert_eq!(history.len(), 4);
  for m in &history[..3] {
    assert_eq!(m.signature.task, "add");
    assert_eq!(m.signature.options.group_id.as_ref(), Some(&group_id));
    assert!(m.signature.options.chord.is_some());
  }
  assert_eq!(history[3].signature.task, UNLOCK_TASK);
  assert_eq!(history[3].countdown, Some(Duration::from_secs(5)));
}

#[test]
fn chord_kwargs_reach_callback() {
  let (_backend, _queue, orch) = recording();
  let mut chord = Chord::new(vec![add(1, 1)], Signature::new("tsum").kwarg("scale", json!(1)));
  chord.kwargs.insert("scale".into(), json!(2));
  chord.kwargs.insert("label".into(), json!("x"));

  let plan = orch.build(&chord, None);
  assert_eq!(plan.descriptor.callback.kwargs["scale"], json!(1));
  assert_eq!(plan.descriptor.callback.kwargs["label"], json!("x"));
}

#[test]
fn descriptor_survives_json_round_trip_with_empty_kwargs() {
  let (_backend, _queue, orch) = recording();
  let chord = Chord::new(vec![add(1, 1), add(2, 2)], Signature::new("tsum")).max_retries(3);
  assert!(chord.kwargs.is_empty());

  let descriptor = orch.build(&chord, None).descriptor;
  let raw = serde_json::to_string(&descriptor).expect("serialize");
  let back: ChordDescriptor = serde_json::from_str(&raw).expect("deserialize");
  assert_eq!(back, descriptor);

  let raw = serde_json::to_string(&chord).expect("serialize");
  let back: Chord = serde_json::from_str(&raw).expect("deserialize");
  assert_eq!(back, chord);
}

#[test]
fn duplicate_enqueue_of_same_id_is_ignored() {
  let queue = InMemoryQueue::new();
  let sig = add(1, 1).with_id(TaskId::from("t-1"));
  queue.enqueue(&sig, None).expect("first");
  queue.enqueue(&sig, None).expect("second");
  assert_eq!(queue.len().expect("len"), 1);
}
