use jobstore::domain::{ClaimResult, InsertOutcome, NewJob};
use jobstore::stubs::InMemoryJobRepository;
use jobstore::JobRepository;
use serde_json::json;

fn new_job(repo: &InMemoryJobRepository, stage: &str) -> uuid::Uuid {
  repo.create_job(NewJob { kind: "fanin_compose".into(),
                           status: "processing".into(),
                           stage: stage.into(),
                           active_task_ref: None,
                           pipeline_state: json!({"pipeline": "fanin_compose", "other_key": 7}),
                           inputs: vec!["asset://in-1".into()] })
      .expect("create job")
}

#[test]
fn claim_stage_has_exactly_one_winner() {
  let repo = InMemoryJobRepository::new();
  let id = new_job(&repo, "awaiting_batch");

  // first claim observes the expected stage and wins
  let first = repo.claim_stage(&id, "awaiting_batch", "composing").expect("claim");
  assert_eq!(first, ClaimResult::Won);

  // a racing duplicate arrives after the stage moved: it must lose
  let second = repo.claim_stage(&id, "awaiting_batch", "composing").expect("claim");
  assert_eq!(second, ClaimResult::Lost);

  let job = repo.get_job(&id).expect("get");
  assert_eq!(job.stage, "composing");
}

#[test]
fn completion_insert_is_unique_per_task() {
  let repo = InMemoryJobRepository::new();
  let id = new_job(&repo, "awaiting_batch");

  let urls = vec!["perm://a.png".to_string()];
  assert_eq!(repo.insert_completion(&id, "task-a", &urls).expect("insert"), InsertOutcome::Recorded);
  // duplicate webhook delivery for the same sub-task
  assert_eq!(repo.insert_completion(&id, "task-a", &urls).expect("insert"), InsertOutcome::Duplicate);
  assert_eq!(repo.insert_completion(&id, "task-b", &urls).expect("insert"), InsertOutcome::Recorded);

  assert_eq!(repo.count_completions(&id).expect("count"), 2);
  let listed = repo.list_completions(&id).expect("list");
  assert_eq!(listed.len(), 2);
}

#[test]
fn terminal_jobs_are_immutable() {
  let repo = InMemoryJobRepository::new();
  let id = new_job(&repo, "composing");

  repo.mark_failed(&id, "provider reported failure").expect("fail");
  let failed = repo.get_job(&id).expect("get");
  assert_eq!(failed.status, "failed");
  assert_eq!(failed.error.as_deref(), Some("provider reported failure"));

  // later duplicate callbacks must not overwrite the terminal state
  repo.mark_completed(&id, None).expect("complete");
  repo.mark_failed(&id, "other reason").expect("fail again");
  repo.set_progress_note(&id, "running").expect("note");

  let after = repo.get_job(&id).expect("get");
  assert_eq!(after.status, "failed");
  assert_eq!(after.error.as_deref(), Some("provider reported failure"));
  assert!(after.completed_at.is_none());
}

#[test]
fn merge_pipeline_state_preserves_unrelated_keys() {
  let repo = InMemoryJobRepository::new();
  let id = new_job(&repo, "awaiting_batch");

  repo.merge_pipeline_state(&id, &json!({"style_prompt": "oleo"})).expect("merge");
  let job = repo.get_job(&id).expect("get");
  // the patched key is present and the pre-existing keys survive the merge
  assert_eq!(job.pipeline_state["style_prompt"], json!("oleo"));
  assert_eq!(job.pipeline_state["other_key"], json!(7));
  assert_eq!(job.pipeline_state["pipeline"], json!("fanin_compose"));
}

#[test]
fn outputs_are_append_only_and_ordered() {
  let repo = InMemoryJobRepository::new();
  let id = new_job(&repo, "finalizing");

  repo.append_outputs(&id, &["perm://1.png".into()]).expect("append");
  repo.append_outputs(&id, &["perm://2.png".into(), "perm://3.png".into()]).expect("append");

  let job = repo.get_job(&id).expect("get");
  assert_eq!(job.outputs, vec!["perm://1.png", "perm://2.png", "perm://3.png"]);
}

#[test]
fn recent_scan_applies_window_and_cap() {
  let repo = InMemoryJobRepository::new();
  for _ in 0..5 {
    new_job(&repo, "awaiting_batch");
  }
  // a terminal job must never appear in the fallback scan
  let done = new_job(&repo, "awaiting_batch");
  repo.mark_completed(&done, None).expect("complete");

  let recent = repo.list_recent_active(chrono::Duration::hours(24), 3).expect("scan");
  assert_eq!(recent.len(), 3);
  assert!(recent.iter().all(|j| !j.is_terminal()));
}
