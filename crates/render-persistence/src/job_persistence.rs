use crate::schema;
use crate::schema::jobs::dsl as jobs_dsl;
use crate::schema::task_completions::dsl as tc_dsl;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use jobstore::{
  ClaimResult, CompletionRecord, InsertOutcome, JobRecord, JobRepository, NewJob, StoreError, STATUS_COMPLETED,
  STATUS_FAILED,
};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use uuid::Uuid;
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");
#[cfg(feature = "pg")]
type DbConn = PgConnection;
#[cfg(not(feature = "pg"))]
type DbConn = SqliteConnection;
type DbPool = Pool<ConnectionManager<DbConn>>;

/// Repo Diesel que implementa `JobRepository`.
pub struct DieselJobRepository {
  pool: Arc<DbPool>,
}

impl DieselJobRepository {
  pub fn new(database_url: &str) -> Self {
    let manager = ConnectionManager::<DbConn>::new(database_url);
    let pool = Pool::builder().max_size(4).build(manager).expect("no se pudo crear el pool de conexiones");
    let repo = DieselJobRepository { pool: Arc::new(pool) };
    if let Ok(mut c) = repo.conn_raw() {
      #[cfg(not(feature = "pg"))]
      {
        let _ = diesel::sql_query("PRAGMA journal_mode = WAL;").execute(&mut c);
        let _ = diesel::sql_query("PRAGMA busy_timeout = 5000;").execute(&mut c);
      }
      match c.run_pending_migrations(MIGRATIONS) {
        Ok(applied) if !applied.is_empty() => log::info!("migraciones aplicadas: {}", applied.len()),
        Ok(_) => {}
        Err(e) => log::warn!("no se pudieron aplicar migraciones: {}", e),
      }
    }
    repo
  }
  fn conn_raw(&self) -> std::result::Result<PooledConnection<ConnectionManager<DbConn>>, r2d2::Error> {
    self.pool.get()
  }
  fn conn(&self) -> Result<PooledConnection<ConnectionManager<DbConn>>, StoreError> {
    self.conn_raw().map_err(|e| StoreError::Storage(format!("pool: {}", e)))
  }
}

/// Construye el repositorio desde `DATABASE_URL` (aplica migraciones
/// embebidas al conectar).
pub fn new_from_env() -> Result<DieselJobRepository, StoreError> {
  dotenvy::dotenv().ok();
  let url = std::env::var("DATABASE_URL").map_err(|_| StoreError::Other("DATABASE_URL no definida".into()))?;
  Ok(DieselJobRepository::new(&url))
}

/// SQLite en memoria (cache compartido, nombre único por llamada) para tests.
pub fn new_sqlite_for_test() -> DieselJobRepository {
  let url = format!("file:jobdb_{}?mode=memory&cache=shared", Uuid::new_v4().simple());
  DieselJobRepository::new(&url)
}

// Diesel row structs for the job tables
#[derive(Debug, Queryable, Insertable)]
#[diesel(table_name = schema::jobs)]
struct JobRow {
  pub id: String,
  pub kind: String,
  pub status: String,
  pub stage: String,
  pub active_task_ref: Option<String>,
  pub pipeline_state: String,
  pub inputs: String,
  pub outputs: String,
  pub error: Option<String>,
  pub created_at_ts: i64,
  pub updated_at_ts: i64,
  pub completed_at_ts: Option<i64>,
}

#[derive(Debug, Queryable, Insertable)]
#[diesel(table_name = schema::task_completions)]
struct CompletionRow {
  pub job_id: String,
  pub task_id: String,
  pub urls: String,
  pub created_at_ts: i64,
}

fn map_db_err<T>(res: std::result::Result<T, DieselError>) -> Result<T, StoreError> {
  res.map_err(|e| match e {
       DieselError::NotFound => StoreError::NotFound("fila no encontrada".into()),
       other => StoreError::Storage(format!("db: {}", other)),
     })
}

fn now_ms() -> i64 {
  Utc::now().timestamp_millis()
}

fn ts_to_datetime(ms: i64) -> DateTime<Utc> {
  DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

fn parse_string_list(raw: &str) -> Vec<String> {
  serde_json::from_str(raw).unwrap_or_default()
}

impl JobRow {
  fn into_record(self) -> Result<JobRecord, StoreError> {
    let id = Uuid::parse_str(&self.id).map_err(|e| StoreError::Storage(format!("uuid inválido: {}", e)))?;
    Ok(JobRecord { id,
                   kind: self.kind,
                   status: self.status,
                   stage: self.stage,
                   active_task_ref: self.active_task_ref,
                   pipeline_state: serde_json::from_str(&self.pipeline_state).unwrap_or(serde_json::json!({})),
                   inputs: parse_string_list(&self.inputs),
                   outputs: parse_string_list(&self.outputs),
                   error: self.error,
                   created_at: ts_to_datetime(self.created_at_ts),
                   updated_at: ts_to_datetime(self.updated_at_ts),
                   completed_at: self.completed_at_ts.map(ts_to_datetime) })
  }
}

const TERMINAL_STATUSES: [&str; 2] = [STATUS_COMPLETED, STATUS_FAILED];

impl JobRepository for DieselJobRepository {
  fn create_job(&self, job: NewJob) -> Result<Uuid, StoreError> {
    let mut conn = self.conn()?;
    let id = Uuid::new_v4();
    let now = now_ms();
    let row = JobRow { id: id.to_string(),
                       kind: job.kind,
                       status: job.status,
                       stage: job.stage,
                       active_task_ref: job.active_task_ref,
                       pipeline_state: job.pipeline_state.to_string(),
                       inputs: serde_json::to_string(&job.inputs).unwrap_or_else(|_| "[]".into()),
                       outputs: "[]".into(),
                       error: None,
                       created_at_ts: now,
                       updated_at_ts: now,
                       completed_at_ts: None };
    map_db_err(diesel::insert_into(jobs_dsl::jobs).values(&row).execute(&mut conn))?;
    Ok(id)
  }

  fn get_job(&self, job_id: &Uuid) -> Result<JobRecord, StoreError> {
    let mut conn = self.conn()?;
    let opt = map_db_err(jobs_dsl::jobs.filter(jobs_dsl::id.eq(job_id.to_string()))
                                       .first::<JobRow>(&mut conn)
                                       .optional())?;
    match opt {
      Some(row) => row.into_record(),
      None => Err(StoreError::NotFound(format!("job {}", job_id))),
    }
  }

  fn find_by_active_task(&self, task_ref: &str) -> Result<Option<JobRecord>, StoreError> {
    let mut conn = self.conn()?;
    let opt = map_db_err(jobs_dsl::jobs.filter(jobs_dsl::active_task_ref.eq(task_ref))
                                       .first::<JobRow>(&mut conn)
                                       .optional())?;
    opt.map(|row| row.into_record()).transpose()
  }

  fn list_recent_active(&self, window: chrono::Duration, cap: i64) -> Result<Vec<JobRecord>, StoreError> {
    let mut conn = self.conn()?;
    let cutoff = now_ms() - window.num_milliseconds();
    let rows = map_db_err(jobs_dsl::jobs.filter(jobs_dsl::status.ne_all(TERMINAL_STATUSES.to_vec()))
                                        .filter(jobs_dsl::created_at_ts.ge(cutoff))
                                        .order(jobs_dsl::created_at_ts.desc())
                                        .limit(cap.max(0))
                                        .load::<JobRow>(&mut conn))?;
    rows.into_iter().map(|r| r.into_record()).collect()
  }

  /// UPDATE condicional sobre `stage`: el número de filas afectadas decide
  /// el ganador, exactamente como un compare-and-set.
  fn claim_stage(&self, job_id: &Uuid, expected_stage: &str, new_stage: &str) -> Result<ClaimResult, StoreError> {
    let mut conn = self.conn()?;
    let id_s = job_id.to_string();
    let affected = map_db_err(diesel::update(jobs_dsl::jobs.filter(jobs_dsl::id.eq(&id_s))
                                                           .filter(jobs_dsl::stage.eq(expected_stage)))
                                .set((jobs_dsl::stage.eq(new_stage), jobs_dsl::updated_at_ts.eq(now_ms())))
                                .execute(&mut conn))?;
    if affected == 1 {
      return Ok(ClaimResult::Won);
    }
    // distinguir "job inexistente" de "otro caller ya avanzó la etapa"
    let exists: i64 = map_db_err(jobs_dsl::jobs.filter(jobs_dsl::id.eq(&id_s)).count().get_result(&mut conn))?;
    if exists == 0 {
      Err(StoreError::NotFound(format!("job {}", job_id)))
    } else {
      Ok(ClaimResult::Lost)
    }
  }

  fn set_active_task(&self, job_id: &Uuid, task_ref: Option<&str>) -> Result<(), StoreError> {
    let mut conn = self.conn()?;
    map_db_err(diesel::update(jobs_dsl::jobs.filter(jobs_dsl::id.eq(job_id.to_string())))
                 .set((jobs_dsl::active_task_ref.eq(task_ref), jobs_dsl::updated_at_ts.eq(now_ms())))
                 .execute(&mut conn))?;
    Ok(())
  }

  /// Merge superficial dentro de una transacción: leer, mezclar claves del
  /// patch, escribir. Las claves no mencionadas sobreviven.
  fn merge_pipeline_state(&self, job_id: &Uuid, patch: &JsonValue) -> Result<(), StoreError> {
    let mut conn = self.conn()?;
    let id_s = job_id.to_string();
    map_db_err(conn.transaction::<_, DieselError, _>(|conn| {
      let current: String =
        jobs_dsl::jobs.filter(jobs_dsl::id.eq(&id_s)).select(jobs_dsl::pipeline_state).first(conn)?;
      let mut value: JsonValue = serde_json::from_str(&current).unwrap_or(serde_json::json!({}));
      if let (Some(base), Some(extra)) = (value.as_object_mut(), patch.as_object()) {
        for (k, v) in extra {
          base.insert(k.clone(), v.clone());
        }
      } else {
        value = patch.clone();
      }
      diesel::update(jobs_dsl::jobs.filter(jobs_dsl::id.eq(&id_s)))
        .set((jobs_dsl::pipeline_state.eq(value.to_string()), jobs_dsl::updated_at_ts.eq(now_ms())))
        .execute(conn)?;
      Ok(())
    }))
  }

  fn append_outputs(&self, job_id: &Uuid, urls: &[String]) -> Result<(), StoreError> {
    let mut conn = self.conn()?;
    let id_s = job_id.to_string();
    map_db_err(conn.transaction::<_, DieselError, _>(|conn| {
      let current: String = jobs_dsl::jobs.filter(jobs_dsl::id.eq(&id_s)).select(jobs_dsl::outputs).first(conn)?;
      let mut list: Vec<String> = serde_json::from_str(&current).unwrap_or_default();
      list.extend(urls.iter().cloned());
      let serialized = serde_json::to_string(&list).unwrap_or_else(|_| "[]".into());
      diesel::update(jobs_dsl::jobs.filter(jobs_dsl::id.eq(&id_s)))
        .set((jobs_dsl::outputs.eq(serialized), jobs_dsl::updated_at_ts.eq(now_ms())))
        .execute(conn)?;
      Ok(())
    }))
  }

  /// La inmutabilidad terminal se aplica en el WHERE: un job completado o
  /// fallido nunca vuelve a mutar, la fila simplemente no matchea.
  fn set_progress_note(&self, job_id: &Uuid, note: &str) -> Result<(), StoreError> {
    let mut conn = self.conn()?;
    map_db_err(diesel::update(jobs_dsl::jobs.filter(jobs_dsl::id.eq(job_id.to_string()))
                                            .filter(jobs_dsl::status.ne_all(TERMINAL_STATUSES.to_vec())))
                 .set((jobs_dsl::status.eq(note), jobs_dsl::updated_at_ts.eq(now_ms())))
                 .execute(&mut conn))?;
    Ok(())
  }

  fn mark_completed(&self, job_id: &Uuid, note: Option<&str>) -> Result<(), StoreError> {
    let mut conn = self.conn()?;
    let now = now_ms();
    map_db_err(diesel::update(jobs_dsl::jobs.filter(jobs_dsl::id.eq(job_id.to_string()))
                                            .filter(jobs_dsl::status.ne_all(TERMINAL_STATUSES.to_vec())))
                 .set((jobs_dsl::status.eq(STATUS_COMPLETED),
                       jobs_dsl::stage.eq(STATUS_COMPLETED),
                       jobs_dsl::active_task_ref.eq(None::<String>),
                       jobs_dsl::error.eq(note),
                       jobs_dsl::completed_at_ts.eq(Some(now)),
                       jobs_dsl::updated_at_ts.eq(now)))
                 .execute(&mut conn))?;
    Ok(())
  }

  fn mark_failed(&self, job_id: &Uuid, reason: &str) -> Result<(), StoreError> {
    let mut conn = self.conn()?;
    map_db_err(diesel::update(jobs_dsl::jobs.filter(jobs_dsl::id.eq(job_id.to_string()))
                                            .filter(jobs_dsl::status.ne_all(TERMINAL_STATUSES.to_vec())))
                 .set((jobs_dsl::status.eq(STATUS_FAILED),
                       jobs_dsl::stage.eq(STATUS_FAILED),
                       jobs_dsl::error.eq(Some(reason)),
                       jobs_dsl::updated_at_ts.eq(now_ms())))
                 .execute(&mut conn))?;
    Ok(())
  }

  /// Insert bajo la clave primaria compuesta; la violación de unicidad es el
  /// camino feliz del duplicado, no un error.
  fn insert_completion(&self, job_id: &Uuid, task_id: &str, urls: &[String]) -> Result<InsertOutcome, StoreError> {
    let mut conn = self.conn()?;
    let row = CompletionRow { job_id: job_id.to_string(),
                              task_id: task_id.to_string(),
                              urls: serde_json::to_string(urls).unwrap_or_else(|_| "[]".into()),
                              created_at_ts: now_ms() };
    match diesel::insert_into(tc_dsl::task_completions).values(&row).execute(&mut conn) {
      Ok(_) => Ok(InsertOutcome::Recorded),
      Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => Ok(InsertOutcome::Duplicate),
      Err(e) => Err(StoreError::Storage(format!("db: {}", e))),
    }
  }

  fn count_completions(&self, job_id: &Uuid) -> Result<i64, StoreError> {
    let mut conn = self.conn()?;
    map_db_err(tc_dsl::task_completions.filter(tc_dsl::job_id.eq(job_id.to_string()))
                                       .count()
                                       .get_result(&mut conn))
  }

  fn list_completions(&self, job_id: &Uuid) -> Result<Vec<CompletionRecord>, StoreError> {
    let mut conn = self.conn()?;
    let rows = map_db_err(tc_dsl::task_completions.filter(tc_dsl::job_id.eq(job_id.to_string()))
                                                  .load::<CompletionRow>(&mut conn))?;
    rows.into_iter()
        .map(|r| {
          let jid = Uuid::parse_str(&r.job_id).map_err(|e| StoreError::Storage(format!("uuid inválido: {}", e)))?;
          Ok(CompletionRecord { job_id: jid,
                                task_id: r.task_id,
                                urls: parse_string_list(&r.urls),
                                created_at: ts_to_datetime(r.created_at_ts) })
        })
        .collect()
  }
}
