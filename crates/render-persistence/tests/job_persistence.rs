// Tests de integración contra SQLite en memoria (cache compartido).
// Cada test crea su propia base; las migraciones embebidas se aplican al
// construir el repositorio.
use jobstore::{ClaimResult, InsertOutcome, JobRepository, NewJob, StoreError};
use render_persistence::new_sqlite_for_test;
use serde_json::json;

fn sample_job() -> NewJob {
  NewJob { kind: "fanin_compose".into(),
           status: "pending".into(),
           stage: "awaiting_batch".into(),
           active_task_ref: None,
           pipeline_state: json!({"pipeline": "fanin_compose", "expected_tasks": 3}),
           inputs: vec!["https://img.example/a.png".into()] }
}

#[test]
fn create_and_get_roundtrip() {
  let repo = new_sqlite_for_test();
  let id = repo.create_job(sample_job()).expect("create");
  let job = repo.get_job(&id).expect("get");
  assert_eq!(job.kind, "fanin_compose");
  assert_eq!(job.status, "pending");
  assert_eq!(job.stage, "awaiting_batch");
  assert_eq!(job.inputs, vec!["https://img.example/a.png".to_string()]);
  assert!(job.outputs.is_empty());
  assert_eq!(job.pipeline_state["expected_tasks"], json!(3));
  assert!(job.completed_at.is_none());
}

#[test]
fn get_missing_job_is_not_found() {
  let repo = new_sqlite_for_test();
  let err = repo.get_job(&uuid::Uuid::new_v4()).unwrap_err();
  assert!(matches!(err, StoreError::NotFound(_)));
}

#[test]
fn find_by_active_task_matches_only_the_owner() {
  let repo = new_sqlite_for_test();
  let id = repo.create_job(sample_job()).expect("create");
  let other = repo.create_job(sample_job()).expect("create");
  repo.set_active_task(&id, Some("task-abc")).expect("set");
  let found = repo.find_by_active_task("task-abc").expect("find").expect("some");
  assert_eq!(found.id, id);
  assert_ne!(found.id, other);
  assert!(repo.find_by_active_task("task-zzz").expect("find").is_none());
}

#[test]
fn claim_stage_is_a_compare_and_set() {
  let repo = new_sqlite_for_test();
  let id = repo.create_job(sample_job()).expect("create");
  let first = repo.claim_stage(&id, "awaiting_batch", "composing").expect("claim");
  assert_eq!(first, ClaimResult::Won);
  // mismo claim de nuevo: la etapa observada ya no coincide
  let second = repo.claim_stage(&id, "awaiting_batch", "composing").expect("claim");
  assert_eq!(second, ClaimResult::Lost);
  let job = repo.get_job(&id).expect("get");
  assert_eq!(job.stage, "composing");
}

#[test]
fn claim_stage_on_missing_job_is_not_found() {
  let repo = new_sqlite_for_test();
  let err = repo.claim_stage(&uuid::Uuid::new_v4(), "a", "b").unwrap_err();
  assert!(matches!(err, StoreError::NotFound(_)));
}

#[test]
fn merge_pipeline_state_preserves_unrelated_keys() {
  let repo = new_sqlite_for_test();
  let id = repo.create_job(sample_job()).expect("create");
  repo.merge_pipeline_state(&id, &json!({"style_prompt": "neón"})).expect("merge");
  let job = repo.get_job(&id).expect("get");
  assert_eq!(job.pipeline_state["expected_tasks"], json!(3));
  assert_eq!(job.pipeline_state["style_prompt"], json!("neón"));
  assert_eq!(job.pipeline_state["pipeline"], json!("fanin_compose"));
}

#[test]
fn append_outputs_is_append_only_and_ordered() {
  let repo = new_sqlite_for_test();
  let id = repo.create_job(sample_job()).expect("create");
  repo.append_outputs(&id, &["https://cdn.example/1.png".into()]).expect("append");
  repo.append_outputs(&id, &["https://cdn.example/2.png".into(), "https://cdn.example/3.png".into()])
      .expect("append");
  let job = repo.get_job(&id).expect("get");
  assert_eq!(job.outputs,
             vec!["https://cdn.example/1.png".to_string(),
                  "https://cdn.example/2.png".to_string(),
                  "https://cdn.example/3.png".to_string()]);
}

#[test]
fn terminal_jobs_are_immutable() {
  let repo = new_sqlite_for_test();
  let id = repo.create_job(sample_job()).expect("create");
  repo.mark_completed(&id, Some("compose degradado")).expect("complete");
  let before = repo.get_job(&id).expect("get");
  assert_eq!(before.status, "completed");
  assert_eq!(before.error.as_deref(), Some("compose degradado"));
  assert!(before.completed_at.is_some());

  // ninguna de estas mutaciones debe tocar un job terminal
  repo.mark_failed(&id, "tarde").expect("noop");
  repo.mark_completed(&id, None).expect("noop");
  repo.set_progress_note(&id, "processing").expect("noop");
  let after = repo.get_job(&id).expect("get");
  assert_eq!(after.status, before.status);
  assert_eq!(after.error, before.error);
  assert_eq!(after.completed_at, before.completed_at);
}

#[test]
fn mark_failed_records_the_reason() {
  let repo = new_sqlite_for_test();
  let id = repo.create_job(sample_job()).expect("create");
  repo.mark_failed(&id, "batch member failed: task-2").expect("fail");
  let job = repo.get_job(&id).expect("get");
  assert_eq!(job.status, "failed");
  assert_eq!(job.stage, "failed");
  assert_eq!(job.error.as_deref(), Some("batch member failed: task-2"));
}

#[test]
fn completion_insert_is_unique_per_task() {
  let repo = new_sqlite_for_test();
  let id = repo.create_job(sample_job()).expect("create");
  let first = repo.insert_completion(&id, "task-1", &["https://cdn.example/a.png".into()]).expect("insert");
  assert_eq!(first, InsertOutcome::Recorded);
  let dup = repo.insert_completion(&id, "task-1", &["https://cdn.example/otra.png".into()]).expect("insert");
  assert_eq!(dup, InsertOutcome::Duplicate);
  assert_eq!(repo.count_completions(&id).expect("count"), 1);

  let rows = repo.list_completions(&id).expect("list");
  assert_eq!(rows.len(), 1);
  // la entrega duplicada no debe pisar las URLs de la primera
  assert_eq!(rows[0].urls, vec!["https://cdn.example/a.png".to_string()]);
}

#[test]
fn completions_are_scoped_per_job() {
  let repo = new_sqlite_for_test();
  let a = repo.create_job(sample_job()).expect("create");
  let b = repo.create_job(sample_job()).expect("create");
  repo.insert_completion(&a, "task-1", &[]).expect("insert");
  repo.insert_completion(&b, "task-1", &[]).expect("insert");
  repo.insert_completion(&b, "task-2", &[]).expect("insert");
  assert_eq!(repo.count_completions(&a).expect("count"), 1);
  assert_eq!(repo.count_completions(&b).expect("count"), 2);
}

#[test]
fn recent_scan_excludes_terminal_jobs() {
  let repo = new_sqlite_for_test();
  let active = repo.create_job(sample_job()).expect("create");
  let done = repo.create_job(sample_job()).expect("create");
  repo.mark_completed(&done, None).expect("complete");
  let listed = repo.list_recent_active(chrono::Duration::hours(24), 200).expect("list");
  let ids: Vec<_> = listed.iter().map(|j| j.id).collect();
  assert!(ids.contains(&active));
  assert!(!ids.contains(&done));
}

#[test]
fn recent_scan_honors_the_cap() {
  let repo = new_sqlite_for_test();
  for _ in 0..5 {
    repo.create_job(sample_job()).expect("create");
  }
  let listed = repo.list_recent_active(chrono::Duration::hours(24), 3).expect("list");
  assert_eq!(listed.len(), 3);
}
