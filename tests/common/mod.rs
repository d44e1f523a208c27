// tests/common/mod.rs

#![allow(dead_code)]

use std::time::Duration;

use quizgrade::{
    config::{Config, GradingConfig, SandboxConfig},
    db,
    handlers::auth::seed_admin_user,
    routes,
    state::AppState,
    utils::jwt::{ROLE_STUDENT, sign_jwt},
};
use reqwest::{Client, Response};
use serde_json::{Value, json};
use sqlx::SqlitePool;
use tempfile::TempDir;

pub const ADMIN_USERNAME: &str = "admin";
pub const ADMIN_PASSWORD: &str = "admin-password";

/// A running server backed by its own database.
pub struct TestApp {
    pub address: String,
    pub pool: SqlitePool,
    pub client: Client,
    pub admin_token: String,
    pub jwt_secret: String,
    /// Holds the database file of disk-backed apps.
    _db_dir: Option<TempDir>,
}

fn fast_grading() -> GradingConfig {
    GradingConfig {
        workers: 2,
        max_attempts: 2,
        retry_backoff: Duration::from_millis(10),
        poll_interval: Duration::from_millis(20),
        stale_after: Duration::from_secs(600),
    }
}

/// Spawns the app on a random port with grading workers running.
///
/// Candidate programs are plain `sh` scripts so tests need no extra
/// interpreter.
pub async fn spawn_app() -> TestApp {
    spawn_app_with(fast_grading()).await
}

/// Spawns the app over a database file with the pool size used in
/// production, so requests really run on separate connections.
pub async fn spawn_app_on_disk() -> TestApp {
    let dir = tempfile::tempdir().expect("Failed to create database directory");
    let url = format!("sqlite://{}", dir.path().join("quizgrade.db").display());
    let state = test_state_on(&url, 5, fast_grading()).await;
    serve(state, Some(dir)).await
}

/// State over a fresh in-memory database with the admin account seeded.
pub async fn test_state(grading: GradingConfig) -> AppState {
    // One connection: an in-memory database lives only as long as it does
    test_state_on("sqlite::memory:", 1, grading).await
}

pub async fn test_state_on(
    database_url: &str,
    max_connections: u32,
    grading: GradingConfig,
) -> AppState {
    let pool = db::connect(database_url, max_connections)
        .await
        .expect("Failed to open database");
    db::migrate(&pool).await.expect("Failed to migrate database");

    let config = Config {
        database_url: database_url.to_string(),
        jwt_secret: "test_secret_for_integration_tests".to_string(),
        jwt_expiration: 600,
        rust_log: "error".to_string(),
        admin_username: Some(ADMIN_USERNAME.to_string()),
        admin_password: Some(ADMIN_PASSWORD.to_string()),
        sandbox: SandboxConfig {
            program: "sh".to_string(),
            extension: ".sh".to_string(),
            timeout: Duration::from_secs(2),
        },
        grading,
    };

    seed_admin_user(&pool, &config)
        .await
        .expect("Failed to seed admin user");

    AppState::new(pool, config)
}

pub async fn spawn_app_with(grading: GradingConfig) -> TestApp {
    serve(test_state(grading).await, None).await
}

async fn serve(state: AppState, db_dir: Option<TempDir>) -> TestApp {
    let pool = state.pool.clone();
    let jwt_secret = state.config.jwt_secret.clone();
    state.start_grading_workers();
    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = Client::new();
    let admin_token = login(&client, &address, ADMIN_USERNAME, ADMIN_PASSWORD).await;

    TestApp {
        address,
        pool,
        client,
        admin_token,
        jwt_secret,
        _db_dir: db_dir,
    }
}

pub async fn login(client: &Client, address: &str, username: &str, password: &str) -> String {
    let response = client
        .post(format!("{}/api/auth/login", address))
        .json(&json!({ "username": username, "password": password }))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 200, "login failed for {}", username);

    let body: Value = response.json().await.unwrap();
    body["token"].as_str().unwrap().to_string()
}

pub fn unique_name() -> String {
    format!("u_{}", &uuid::Uuid::new_v4().to_string()[..8])
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    /// Registers a fresh student and returns its token.
    pub async fn student(&self) -> String {
        let username = unique_name();
        let response = self
            .client
            .post(self.url("/api/auth/register"))
            .json(&json!({ "username": username, "password": "password123" }))
            .send()
            .await
            .expect("Failed to execute request");
        assert_eq!(response.status().as_u16(), 201);

        login(&self.client, &self.address, &username, "password123").await
    }

    /// Inserts a student straight into the database and signs a token for
    /// it. Skips password hashing for tests that need many accounts.
    pub async fn quick_student(&self) -> String {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO users (username, password, role, created_at) VALUES (?, 'unusable', 'user', ?) RETURNING id",
        )
        .bind(unique_name())
        .bind(chrono::Utc::now())
        .fetch_one(&self.pool)
        .await
        .expect("Failed to insert student");

        sign_jwt(id, ROLE_STUDENT, &self.jwt_secret, 600).expect("Failed to sign token")
    }

    pub async fn put(&self, token: &str, path: &str, body: &Value) -> Response {
        self.client
            .put(self.url(path))
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn get(&self, token: &str, path: &str) -> Response {
        self.client
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn post(&self, token: &str, path: &str, body: &Value) -> Response {
        self.client
            .post(self.url(path))
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// Creates a quiz as admin. `overrides` is merged over sane defaults.
    pub async fn create_quiz(&self, overrides: Value) -> i64 {
        let mut body = json!({
            "title": "Rust basics",
            "duration_minutes": 30,
            "max_attempts": 3,
        });
        if let (Some(base), Some(extra)) = (body.as_object_mut(), overrides.as_object()) {
            for (key, value) in extra {
                base.insert(key.clone(), value.clone());
            }
        }

        let response = self.post(&self.admin_token, "/api/admin/quizzes", &body).await;
        assert_eq!(response.status().as_u16(), 201);
        let quiz: Value = response.json().await.unwrap();
        quiz["id"].as_i64().unwrap()
    }

    /// Adds a question as admin; returns its id and its choice ids.
    pub async fn add_question(&self, quiz_id: i64, body: Value) -> (i64, Vec<i64>) {
        let response = self
            .post(
                &self.admin_token,
                &format!("/api/admin/quizzes/{}/questions", quiz_id),
                &body,
            )
            .await;
        assert_eq!(response.status().as_u16(), 201);
        let created: Value = response.json().await.unwrap();
        let choice_ids = created["choice_ids"]
            .as_array()
            .unwrap()
            .iter()
            .map(|id| id.as_i64().unwrap())
            .collect();
        (created["id"].as_i64().unwrap(), choice_ids)
    }

    pub async fn add_true_false(&self, quiz_id: i64, correct: bool, points: i64) -> i64 {
        let (id, _) = self
            .add_question(
                quiz_id,
                json!({
                    "text": "Rust has a garbage collector.",
                    "question_type": "tf",
                    "points": points,
                    "choices": [
                        { "choice_text": "True", "is_correct": correct },
                        { "choice_text": "False", "is_correct": !correct },
                    ],
                }),
            )
            .await;
        id
    }

    /// A code question whose program must print the sum of two lines.
    pub async fn add_sum_question(&self, quiz_id: i64, points: i64) -> i64 {
        let (id, _) = self
            .add_question(
                quiz_id,
                json!({
                    "text": "Add two numbers",
                    "question_type": "code",
                    "points": points,
                    "problem_statement": "Read two integers, print their sum.",
                    "test_cases": [
                        { "input_data": "3\n4\n", "expected_output": "7" },
                        { "input_data": "0\n0\n", "expected_output": "0", "is_hidden": true },
                    ],
                }),
            )
            .await;
        id
    }

    /// Starts an attempt and returns its id.
    pub async fn start(&self, token: &str, quiz_id: i64) -> i64 {
        let response = self
            .post(token, &format!("/api/quizzes/{}/start", quiz_id), &json!({}))
            .await;
        assert_eq!(response.status().as_u16(), 201);
        let body: Value = response.json().await.unwrap();
        body["attempt_id"].as_i64().unwrap()
    }

    pub async fn submit(&self, token: &str, attempt_id: i64, answers: Value) -> Response {
        self.post(
            token,
            &format!("/api/attempts/{}/submit", attempt_id),
            &json!({ "answers": answers }),
        )
        .await
    }

    /// Polls the attempt until no answer is pending any more.
    pub async fn wait_for_grading(&self, token: &str, attempt_id: i64) -> Value {
        for _ in 0..200 {
            let view: Value = self
                .get(token, &format!("/api/attempts/{}", attempt_id))
                .await
                .json()
                .await
                .unwrap();
            if view["grading_complete"].as_bool() == Some(true) {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("attempt {} was never fully graded", attempt_id);
    }
}

pub const SUM_PROGRAM: &str = "read a\nread b\necho $((a + b))\n";

pub const CRASHING_PROGRAM: &str = "echo 'boom' >&2\nexit 3\n";
