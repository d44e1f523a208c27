// src/routes.rs

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{delete, get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{admin, attempt, auth, feedback, grading, profile, quiz},
    state::AppState,
    utils::jwt::{admin_middleware, auth_middleware},
};

/// Assembles the main application router.
///
/// * Merges all sub-routers (auth, student, admin).
/// * Applies global middleware (Trace, CORS).
/// * Injects global state (pool, config, grading queue, attempt locks).
pub fn create_router(state: AppState) -> Router {
    let origins = [
        HeaderValue::from_static("http://localhost:3000"),
        HeaderValue::from_static("http://127.0.0.1:3000"),
    ];

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login));

    // Everything a signed-in student can do
    let student_routes = Router::new()
        .route("/api/quizzes", get(quiz::list_quizzes))
        .route("/api/quizzes/{id}", get(quiz::get_quiz))
        .route("/api/quizzes/{id}/start", post(attempt::start_attempt))
        .route("/api/attempts", get(attempt::list_attempts))
        .route("/api/attempts/{id}", get(attempt::get_attempt))
        .route("/api/attempts/{id}/submit", post(attempt::submit_attempt))
        .route("/api/leaderboard", get(attempt::get_leaderboard))
        .route("/api/feedback", post(feedback::create_feedback))
        .route("/api/grading-jobs/{id}", get(grading::get_grading_job))
        .route(
            "/api/profile",
            get(profile::get_profile).put(profile::update_profile),
        )
        .route("/api/profile/password", put(profile::change_password))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let admin_routes = Router::new()
        .route("/quizzes", post(admin::create_quiz))
        .route(
            "/quizzes/{id}",
            put(admin::update_quiz).delete(admin::delete_quiz),
        )
        .route("/quizzes/{id}/questions", post(admin::create_question))
        .route("/quizzes/{id}/feedback", get(feedback::list_quiz_feedback))
        .route("/questions/{id}", delete(admin::delete_question))
        .route("/attempts/{id}/regrade", post(admin::regrade_attempt))
        // Double middleware protection: Auth first, then Admin check
        .layer(middleware::from_fn(admin_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .nest("/api/auth", auth_routes)
        .nest("/api/admin", admin_routes)
        .merge(student_routes)
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
