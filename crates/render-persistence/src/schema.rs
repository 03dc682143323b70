// Simplified Diesel schema shared by SQLite (tests) and Postgres (pg feature).
// Tablas: jobs, task_completions
use diesel::allow_tables_to_appear_in_same_query;
diesel::table! {
    jobs (id) {
        id -> Text,
        kind -> Text,
        status -> Text,
        stage -> Text,
        active_task_ref -> Nullable<Text>,
        pipeline_state -> Text,
        inputs -> Text,
        outputs -> Text,
        error -> Nullable<Text>,
        created_at_ts -> BigInt,
        updated_at_ts -> BigInt,
        completed_at_ts -> Nullable<BigInt>,
    }
}
diesel::table! {
    // Clave primaria compuesta: es la restricción de unicidad que deduplica
    // entregas repetidas del mismo sub-task.
    task_completions (job_id, task_id) {
        job_id -> Text,
        task_id -> Text,
        urls -> Text,
        created_at_ts -> BigInt,
    }
}
allow_tables_to_appear_in_same_query!(jobs, task_completions);
