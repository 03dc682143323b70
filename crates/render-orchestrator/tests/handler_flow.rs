// Tests del manejador de punta a punta: firma, resolución, ack estructurado
// y efectos posteriores a la completitud (realce y export).
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use jobstore::{stubs::InMemoryJobRepository, JobRepository, NewJob};
use render_domain::{FanInState, PipelineState};
use render_orchestrator::{
  CallbackHandler, CallbackOutcome, CallbackQuery, ControllerConfig, FollowOnSpawner, JobResolver,
  OutputMaterializer, StageController, WebhookHeaders, WebhookVerifier,
};
use render_providers::stubs::{CountingReportingSink, StubAssetStore, StubGenerationProvider};
use render_providers::RetryPolicy;
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const WEBHOOK_URL: &str = "http://localhost:8080/webhooks/generation";

struct Harness {
  repo: Arc<InMemoryJobRepository>,
  provider: Arc<StubGenerationProvider>,
  sink: Arc<CountingReportingSink>,
  handler: CallbackHandler,
}

fn harness(verifier: WebhookVerifier) -> Harness {
  let repo = Arc::new(InMemoryJobRepository::new());
  let provider = Arc::new(StubGenerationProvider::new());
  let assets = Arc::new(StubAssetStore::new());
  let sink = Arc::new(CountingReportingSink::new());
  let retry = RetryPolicy { attempts: 3, base_delay: Duration::from_millis(1) };
  let controller = StageController::new(repo.clone(),
                                        provider.clone(),
                                        OutputMaterializer::new(assets, "renders", retry.clone()),
                                        ControllerConfig { webhook_url: WEBHOOK_URL.into(),
                                                           compose_window: chrono::Duration::minutes(10),
                                                           retry: retry.clone() });
  let spawner = FollowOnSpawner::new(repo.clone(), provider.clone(), WEBHOOK_URL, retry);
  let handler = CallbackHandler::new(verifier,
                                     JobResolver::new(repo.clone()),
                                     controller,
                                     spawner,
                                     sink.clone(),
                                     repo.clone());
  Harness { repo, provider, sink, handler }
}

fn fanin_job(repo: &InMemoryJobRepository, tasks: &[&str]) -> Uuid {
  let state = FanInState { expected_tasks: tasks.iter().map(|t| t.to_string()).collect(),
                           prompt: "componer".into(),
                           template_url: None,
                           aspect_ratio: None,
                           target_ratio: None,
                           compose_deadline: None };
  repo.create_job(NewJob { kind: "fanin_compose".into(),
                           status: "processing".into(),
                           stage: "awaiting_batch".into(),
                           active_task_ref: None,
                           pipeline_state: PipelineState::FanIn(state).to_value().expect("state"),
                           inputs: vec![] })
      .expect("create")
}

fn body_for(task: &str, status: &str, url: Option<&str>) -> Vec<u8> {
  let output = url.map(|u| serde_json::json!(u)).unwrap_or(serde_json::Value::Null);
  serde_json::json!({"task_id": task, "status": status, "output": output}).to_string().into_bytes()
}

fn sign(secret: &[u8], id: &str, ts: i64, body: &[u8]) -> String {
  let mut mac = Hmac::<Sha256>::new_from_slice(secret).expect("clave");
  mac.update(format!("{}.{}.", id, ts).as_bytes());
  mac.update(body);
  format!("v1,{}", BASE64.encode(mac.finalize().into_bytes()))
}

#[tokio::test]
async fn full_fanin_flow_acks_spawns_and_exports() {
  let h = harness(WebhookVerifier::bypassed());
  let id = fanin_job(&h.repo, &["a", "b"]);
  let query = CallbackQuery::default();

  for task in ["a", "b"] {
    let body = body_for(task, "succeeded", Some(&format!("https://eph.example/{}.png", task)));
    let outcome = h.handler.handle(WebhookHeaders::default(), &query, &body).await;
    assert!(matches!(outcome, CallbackOutcome::Ack(_)));
  }
  let compose_task = h.provider.last_task_id().expect("compose sometido");
  let body = body_for(&compose_task, "succeeded", Some("https://eph.example/final.png"));
  let outcome = h.handler.handle(WebhookHeaders::default(), &query, &body).await;
  match outcome {
    CallbackOutcome::Ack(ack) => {
      assert!(ack.received);
      assert_eq!(ack.status, "completed");
    }
    other => panic!("se esperaba Ack, llegó {:?}", other),
  }

  let job = h.repo.get_job(&id).expect("get");
  assert_eq!(job.status, "completed");
  // realce: un job dependiente por salida, con su task sometido
  let children: Vec<_> = h.repo.list_recent_active(chrono::Duration::hours(1), 50)
                               .expect("list")
                               .into_iter()
                               .filter(|j| j.kind == "single_call")
                               .collect();
  assert_eq!(children.len(), 1);
  assert_eq!(children[0].inputs, job.outputs);
  assert!(children[0].active_task_ref.is_some());
  // el hijo queda enlazado a su padre a través del blob de estado
  assert_eq!(children[0].pipeline_state.get("parent_job_id").and_then(|v| v.as_str()),
             Some(id.to_string().as_str()));

  // export en segundo plano: ceder el scheduler hasta observarlo
  for _ in 0..50 {
    if h.sink.exported_count() > 0 {
      break;
    }
    tokio::time::sleep(Duration::from_millis(2)).await;
  }
  assert_eq!(h.sink.exported_count(), 1);
  assert_eq!(h.sink.last_summary().expect("resumen").job_id, id);
}

#[tokio::test]
async fn stale_timestamp_is_unauthorized_even_with_valid_signature() {
  let h = harness(WebhookVerifier::new("clave-compartida").expect("verifier"));
  let id = fanin_job(&h.repo, &["a"]);
  let query = CallbackQuery { job_id: Some(id), stage: None };

  let body = body_for("a", "succeeded", Some("https://eph.example/a.png"));
  let ts = chrono::Utc::now().timestamp() - 600; // 10 minutos atrás
  let sig = sign(b"clave-compartida", "msg-1", ts, &body);
  let ts_s = ts.to_string();
  let headers = WebhookHeaders { id: Some("msg-1"), timestamp: Some(&ts_s), signature: Some(&sig) };

  let outcome = h.handler.handle(headers, &query, &body).await;
  assert!(matches!(outcome, CallbackOutcome::Unauthorized));
  // mejor esfuerzo: el job correlacionado queda fallado, no colgado
  let job = h.repo.get_job(&id).expect("get");
  assert_eq!(job.status, "failed");
  assert_eq!(job.error.as_deref(), Some("signature verification failed"));
}

#[tokio::test]
async fn valid_signature_passes_end_to_end() {
  let secret = format!("whsec_{}", BASE64.encode(b"clave-binaria"));
  let h = harness(WebhookVerifier::new(&secret).expect("verifier"));
  let id = fanin_job(&h.repo, &["a", "b"]);
  let query = CallbackQuery { job_id: Some(id), stage: Some("awaiting_batch".into()) };

  let body = body_for("a", "succeeded", Some("https://eph.example/a.png"));
  let ts = chrono::Utc::now().timestamp();
  let sig = sign(b"clave-binaria", "msg-2", ts, &body);
  let ts_s = ts.to_string();
  let headers = WebhookHeaders { id: Some("msg-2"), timestamp: Some(&ts_s), signature: Some(&sig) };

  let outcome = h.handler.handle(headers, &query, &body).await;
  match outcome {
    CallbackOutcome::Ack(ack) => assert_eq!(ack.status, "recorded"),
    other => panic!("se esperaba Ack, llegó {:?}", other),
  }
}

#[tokio::test]
async fn orphan_callbacks_are_acknowledged_and_dropped() {
  let h = harness(WebhookVerifier::bypassed());
  let body = body_for("task-fantasma", "succeeded", Some("https://eph.example/x.png"));
  let outcome = h.handler.handle(WebhookHeaders::default(), &CallbackQuery::default(), &body).await;
  assert!(matches!(outcome, CallbackOutcome::NotFound));
}

#[tokio::test]
async fn follow_on_failures_never_touch_the_parent() {
  let repo = Arc::new(InMemoryJobRepository::new());
  let provider = Arc::new(StubGenerationProvider::new());
  provider.set_failing(true);
  let retry = RetryPolicy { attempts: 2, base_delay: Duration::from_millis(1) };
  let spawner = FollowOnSpawner::new(repo.clone(), provider.clone(), WEBHOOK_URL, retry);

  let id = fanin_job(&repo, &["a"]);
  repo.append_outputs(&id, &["perm://renders/1".into(), "perm://renders/2".into()]).expect("append");
  repo.mark_completed(&id, None).expect("complete");
  let parent = repo.get_job(&id).expect("get");

  let spawned = spawner.spawn_enhancements(&parent).await;
  assert_eq!(spawned, 0);
  // el padre sigue completado, intacto
  let after = repo.get_job(&id).expect("get");
  assert_eq!(after.status, "completed");
  assert_eq!(after.outputs.len(), 2);
}

#[tokio::test]
async fn single_call_kind_spawns_no_descendants() {
  let repo = Arc::new(InMemoryJobRepository::new());
  let provider = Arc::new(StubGenerationProvider::new());
  let retry = RetryPolicy { attempts: 2, base_delay: Duration::from_millis(1) };
  let spawner = FollowOnSpawner::new(repo.clone(), provider.clone(), WEBHOOK_URL, retry);

  let state = render_domain::SingleState { prompt: "p".into(), aspect_ratio: None, target_ratio: None };
  let id = repo.create_job(NewJob { kind: "single_call".into(),
                                    status: "processing".into(),
                                    stage: "awaiting_task".into(),
                                    active_task_ref: None,
                                    pipeline_state: PipelineState::Single(state).to_value().expect("state"),
                                    inputs: vec![] })
               .expect("create");
  repo.append_outputs(&id, &["perm://renders/1".into()]).expect("append");
  repo.mark_completed(&id, None).expect("complete");
  let parent = repo.get_job(&id).expect("get");

  // los jobs de realce son single_call y no generan más descendencia
  assert_eq!(spawner.spawn_enhancements(&parent).await, 0);
  assert_eq!(provider.submission_count(), 0);
}

#[tokio::test]
async fn malformed_bodies_are_bad_requests() {
  let h = harness(WebhookVerifier::bypassed());
  let query = CallbackQuery::default();

  let outcome = h.handler.handle(WebhookHeaders::default(), &query, b"esto no es json").await;
  assert!(matches!(outcome, CallbackOutcome::BadRequest(_)));
  // JSON válido pero sin task_id
  let outcome = h.handler.handle(WebhookHeaders::default(), &query, br#"{"status":"succeeded"}"#).await;
  assert!(matches!(outcome, CallbackOutcome::BadRequest(_)));
}
