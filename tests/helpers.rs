#![allow(dead_code)]

use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use sqlx::postgres::PgConnectOptions;
use sqlx::PgPool;
use taskqueue::{Schedule, Task, TaskQueueOptions, TaskStatus, TaskStore};
use tokio::sync::Mutex;
use tokio::sync::OnceCell;
use tokio::task::LocalSet;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

pub const SCHEMA: &str = "taskqueue";

const TASK_FIELDS: &str = "task_id, queue, type, spec, status, progress, created_at, updated_at, started_at, finished_at, last_heartbeat_at, schedule_id";
const SCHEDULE_FIELDS: &str = "schedule_id, task_queue, task_type, task_spec, cron_schedule, next_execution_time, created_at, updated_at";

#[derive(Clone, Debug)]
pub struct TestDatabase {
    pub source_pool: PgPool,
    pub test_pool: PgPool,
    pub name: String,
}

/// A task row written directly, bypassing the queue API
#[derive(Debug, Clone)]
pub struct RawTask {
    pub queue: &'static str,
    pub task_type: &'static str,
    pub status: TaskStatus,
    pub spec: Value,
    pub created_ago: chrono::Duration,
    pub heartbeat_ago: Option<chrono::Duration>,
    pub finished_ago: Option<chrono::Duration>,
}

impl RawTask {
    pub fn new(queue: &'static str, status: TaskStatus) -> Self {
        RawTask {
            queue,
            task_type: "t",
            status,
            spec: serde_json::json!({}),
            created_ago: chrono::Duration::zero(),
            heartbeat_ago: None,
            finished_ago: None,
        }
    }

    pub fn heartbeat_ago(mut self, ago: chrono::Duration) -> Self {
        self.heartbeat_ago = Some(ago);
        self
    }

    pub fn finished_ago(mut self, ago: chrono::Duration) -> Self {
        self.finished_ago = Some(ago);
        self
    }

    pub fn created_ago(mut self, ago: chrono::Duration) -> Self {
        self.created_ago = ago;
        self
    }
}

impl TestDatabase {
    async fn drop(&self) {
        self.test_pool.close().await;
        sqlx::query(&format!("DROP DATABASE {} WITH (FORCE)", self.name))
            .execute(&self.source_pool)
            .await
            .expect("Failed to drop test database");
    }

    pub fn create_options(&self) -> TaskQueueOptions {
        TaskQueueOptions::default()
            .pg_pool(self.test_pool.clone())
            .schema(SCHEMA)
            .poll_frequency(Duration::from_millis(200))
            .scheduling_interval(Duration::from_millis(200))
            .worker_refresh_interval(Duration::from_secs(5))
            .min_reconnect_timeout(Duration::from_millis(10))
            .max_reconnect_timeout(Duration::from_millis(500))
    }

    pub async fn create_store(&self) -> TaskStore {
        self.create_options()
            .init()
            .await
            .expect("Failed to create store")
    }

    pub async fn get_tasks(&self) -> Vec<Task> {
        sqlx::query_as(&format!(
            "select {TASK_FIELDS} from {SCHEMA}.tasks order by created_at asc, task_id asc"
        ))
        .fetch_all(&self.test_pool)
        .await
        .expect("Failed to get tasks")
    }

    pub async fn get_task(&self, task_id: Uuid) -> Task {
        sqlx::query_as(&format!(
            "select {TASK_FIELDS} from {SCHEMA}.tasks where task_id = $1"
        ))
        .bind(task_id)
        .fetch_one(&self.test_pool)
        .await
        .expect("Failed to get task")
    }

    pub async fn get_schedules(&self) -> Vec<Schedule> {
        sqlx::query_as(&format!(
            "select {SCHEDULE_FIELDS} from {SCHEMA}.schedules order by created_at asc"
        ))
        .fetch_all(&self.test_pool)
        .await
        .expect("Failed to get schedules")
    }

    pub async fn get_schedule(&self, schedule_id: Uuid) -> Schedule {
        sqlx::query_as(&format!(
            "select {SCHEDULE_FIELDS} from {SCHEMA}.schedules where schedule_id = $1"
        ))
        .bind(schedule_id)
        .fetch_one(&self.test_pool)
        .await
        .expect("Failed to get schedule")
    }

    pub async fn insert_task(&self, raw: RawTask) -> Uuid {
        let now = Utc::now();
        let started_at = match raw.status {
            TaskStatus::Waiting => None,
            _ => Some(now - raw.heartbeat_ago.unwrap_or_else(chrono::Duration::zero)),
        };

        sqlx::query_scalar(&format!(
            r#"
                insert into {SCHEMA}.tasks
                    (task_id, queue, type, spec, status, created_at, updated_at, started_at, finished_at, last_heartbeat_at)
                    values ($1, $2, $3, $4, $5, $6, $6, $7, $8, $9)
                    returning task_id
            "#
        ))
        .bind(Uuid::now_v7())
        .bind(raw.queue)
        .bind(raw.task_type)
        .bind(&raw.spec)
        .bind(raw.status.as_str())
        .bind(now - raw.created_ago)
        .bind(started_at)
        .bind(raw.finished_ago.map(|ago| now - ago))
        .bind(raw.heartbeat_ago.map(|ago| now - ago))
        .fetch_one(&self.test_pool)
        .await
        .expect("Failed to insert task")
    }

    pub async fn insert_schedule(
        &self,
        queue: &str,
        task_type: &str,
        spec: Value,
        cron_schedule: &str,
        next_execution_ago: chrono::Duration,
    ) -> Uuid {
        sqlx::query_scalar(&format!(
            r#"
                insert into {SCHEMA}.schedules
                    (schedule_id, task_queue, task_type, task_spec, cron_schedule, next_execution_time)
                    values ($1, $2, $3, $4, $5, now() - $6::interval)
                    returning schedule_id
            "#
        ))
        .bind(Uuid::now_v7())
        .bind(queue)
        .bind(task_type)
        .bind(spec)
        .bind(cron_schedule)
        .bind(next_execution_ago)
        .fetch_one(&self.test_pool)
        .await
        .expect("Failed to insert schedule")
    }
}

pub async fn create_test_database() -> TestDatabase {
    let db_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let mut pg_conn_options: PgConnectOptions =
        db_url.parse().expect("Failed to parse DATABASE_URL");
    pg_conn_options = pg_conn_options.application_name("__test_taskqueue");

    let pg_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(4)
        .connect_with(pg_conn_options.clone())
        .await
        .expect("Failed to connect to database");

    let db_id = Uuid::now_v7();
    let db_name = format!("__test_taskqueue_{}", db_id.simple());

    sqlx::query(&format!("CREATE DATABASE {}", db_name))
        .execute(&pg_pool)
        .await
        .expect("Failed to create test database");

    let test_options = pg_conn_options.database(&db_name);

    let test_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(8)
        .connect_with(test_options)
        .await
        .expect("Failed to connect to test database");

    TestDatabase {
        source_pool: pg_pool,
        test_pool,
        name: db_name,
    }
}

pub async fn with_test_db<F, Fut>(test_fn: F)
where
    F: FnOnce(TestDatabase) -> Fut + 'static,
    Fut: std::future::Future<Output = ()>,
{
    let local_set = LocalSet::new();

    local_set
        .run_until(async move {
            let test_db = create_test_database().await;
            let test_db_2 = test_db.clone();

            let result = tokio::task::spawn_local(async move {
                test_fn(test_db_2).await;
            })
            .await;

            test_db.drop().await;
            result.expect("Test failed");
        })
        .await;
}

pub struct StaticCounter {
    cell: OnceCell<Mutex<u32>>,
}
async fn init_count() -> Mutex<u32> {
    Mutex::new(0)
}
impl StaticCounter {
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::const_new(),
        }
    }

    pub async fn increment(&self) -> u32 {
        let cell = self.cell.get_or_init(init_count).await;
        let mut count = cell.lock().await;
        *count += 1;
        *count
    }

    pub async fn get(&self) -> u32 {
        let cell = self.cell.get_or_init(init_count).await;
        *cell.lock().await
    }
}

pub async fn enable_logs() {
    static ONCE: OnceCell<()> = OnceCell::const_new();

    ONCE.get_or_init(|| async {
        let fmt_layer = tracing_subscriber::fmt::layer();
        // Log level set to debug except for sqlx set at warn (to not show all sql requests)
        let filter_layer = EnvFilter::try_new("debug,sqlx=warn").unwrap();

        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .init();
    })
    .await;
}
