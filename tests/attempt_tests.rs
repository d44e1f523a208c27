// tests/attempt_tests.rs

mod common;

use chrono::{Duration, Utc};
use common::{SUM_PROGRAM, spawn_app, spawn_app_on_disk};
use serde_json::{Value, json};
use tokio::task::JoinSet;

#[tokio::test]
async fn attempt_limit_is_enforced() {
    let app = spawn_app().await;
    let quiz_id = app.create_quiz(json!({ "max_attempts": 1 })).await;
    let token = app.student().await;

    app.start(&token, quiz_id).await;

    let response = app
        .post(&token, &format!("/api/quizzes/{}/start", quiz_id), &json!({}))
        .await;
    assert_eq!(response.status().as_u16(), 403);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "attempt_limit_exceeded");

    // Another student has a budget of their own
    let other = app.student().await;
    app.start(&other, quiz_id).await;
}

#[tokio::test]
async fn concurrent_starts_never_exceed_the_limit() {
    let app = spawn_app().await;
    let quiz_id = app.create_quiz(json!({ "max_attempts": 2 })).await;
    let token = app.student().await;
    let url = app.url(&format!("/api/quizzes/{}/start", quiz_id));

    let mut set = JoinSet::new();
    for _ in 0..6 {
        let client = app.client.clone();
        let url = url.clone();
        let token = token.clone();
        set.spawn(async move {
            client
                .post(url)
                .bearer_auth(token)
                .send()
                .await
                .unwrap()
                .status()
                .as_u16()
        });
    }
    let statuses = set.join_all().await;

    assert_eq!(statuses.iter().filter(|s| **s == 201).count(), 2);
    assert!(statuses.iter().all(|s| *s == 201 || *s == 403));

    let stored: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM attempts WHERE quiz_id = ?")
        .bind(quiz_id)
        .fetch_one(&app.pool)
        .await
        .unwrap();
    assert_eq!(stored, 2);
}

#[tokio::test]
async fn start_reports_window_and_activity() {
    let app = spawn_app().await;
    let now = Utc::now();
    let token = app.student().await;

    let cases = [
        (json!({ "start_time": now + Duration::hours(1) }), "quiz_not_yet_open"),
        (
            json!({ "start_time": now - Duration::hours(2), "end_time": now - Duration::hours(1) }),
            "quiz_closed",
        ),
        (json!({ "active": false }), "quiz_inactive"),
    ];

    for (settings, code) in cases {
        let quiz_id = app.create_quiz(settings).await;
        let response = app
            .post(&token, &format!("/api/quizzes/{}/start", quiz_id), &json!({}))
            .await;
        assert_eq!(response.status().as_u16(), 403);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["code"], code);
    }

    let response = app.post(&token, "/api/quizzes/9999/start", &json!({})).await;
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn true_false_is_graded_by_truthiness() {
    let app = spawn_app().await;
    let quiz_id = app.create_quiz(json!({})).await;
    let question = app.add_true_false(quiz_id, true, 4).await;
    let token = app.student().await;

    let wrong = app.start(&token, quiz_id).await;
    let view: Value = app
        .submit(&token, wrong, json!([{ "question": question, "selected_option": "false" }]))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(view["total_score"], 0);
    assert_eq!(view["answers"][0]["is_correct"], false);

    let right = app.start(&token, quiz_id).await;
    let view: Value = app
        .submit(&token, right, json!([{ "question": question, "selected_option": "True" }]))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(view["total_score"], 4);
    assert_eq!(view["total_possible_points"], 4);
    assert_eq!(view["grading_complete"], true);
}

#[tokio::test]
async fn multiple_choice_needs_the_exact_set() {
    let app = spawn_app().await;
    let quiz_id = app.create_quiz(json!({})).await;
    let (question, choices) = app
        .add_question(
            quiz_id,
            json!({
                "text": "Which are integer types?",
                "question_type": "mcq",
                "points": 3,
                "choices": [
                    { "choice_text": "i32", "is_correct": true },
                    { "choice_text": "u8", "is_correct": true },
                    { "choice_text": "f64" },
                ],
            }),
        )
        .await;
    let token = app.student().await;

    let partial = app.start(&token, quiz_id).await;
    let view: Value = app
        .submit(&token, partial, json!([{ "question": question, "selected_option": choices[0] }]))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(view["total_score"], 0);

    let exact = app.start(&token, quiz_id).await;
    let view: Value = app
        .submit(
            &token,
            exact,
            json!([{ "question": question, "selected_option": [choices[1], choices[0]] }]),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(view["total_score"], 3);
}

#[tokio::test]
async fn text_answers_ignore_case_and_surrounding_space() {
    let app = spawn_app().await;
    let quiz_id = app.create_quiz(json!({})).await;
    let (question, _) = app
        .add_question(
            quiz_id,
            json!({
                "text": "Name the borrow checker's favourite keyword",
                "question_type": "text",
                "points": 2,
                "correct_text_answer": "mut",
            }),
        )
        .await;
    let token = app.student().await;
    let attempt = app.start(&token, quiz_id).await;

    let view: Value = app
        .submit(&token, attempt, json!([{ "question": question, "answer_text": "  MUT " }]))
        .await
        .json()
        .await
        .unwrap();

    assert_eq!(view["total_score"], 2);
}

#[tokio::test]
async fn second_submit_is_rejected_and_keeps_the_score() {
    let app = spawn_app().await;
    let quiz_id = app.create_quiz(json!({})).await;
    let question = app.add_true_false(quiz_id, true, 5).await;
    let token = app.student().await;
    let attempt = app.start(&token, quiz_id).await;

    let first = app
        .submit(&token, attempt, json!([{ "question": question, "selected_option": true }]))
        .await;
    assert_eq!(first.status().as_u16(), 200);

    let second = app
        .submit(&token, attempt, json!([{ "question": question, "selected_option": false }]))
        .await;
    assert_eq!(second.status().as_u16(), 400);
    let body: Value = second.json().await.unwrap();
    assert_eq!(body["code"], "already_submitted");

    let view: Value = app
        .get(&token, &format!("/api/attempts/{}", attempt))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(view["total_score"], 5);
    assert_eq!(view["answers"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_submits_grade_once() {
    let app = spawn_app().await;
    let quiz_id = app.create_quiz(json!({})).await;
    let question = app.add_true_false(quiz_id, true, 5).await;
    let token = app.student().await;
    let attempt = app.start(&token, quiz_id).await;
    let url = app.url(&format!("/api/attempts/{}/submit", attempt));

    let mut set = JoinSet::new();
    for _ in 0..4 {
        let client = app.client.clone();
        let url = url.clone();
        let token = token.clone();
        set.spawn(async move {
            client
                .post(url)
                .bearer_auth(token)
                .json(&json!({ "answers": [{ "question": question, "selected_option": true }] }))
                .send()
                .await
                .unwrap()
                .status()
                .as_u16()
        });
    }
    let statuses = set.join_all().await;

    assert_eq!(statuses.iter().filter(|s| **s == 200).count(), 1);
    assert_eq!(statuses.iter().filter(|s| **s == 400).count(), 3);

    let total: i64 = sqlx::query_scalar("SELECT total_score FROM attempts WHERE id = ?")
        .bind(attempt)
        .fetch_one(&app.pool)
        .await
        .unwrap();
    assert_eq!(total, 5);
}

#[tokio::test]
async fn rejected_submission_leaves_nothing_behind() {
    let app = spawn_app().await;
    let quiz_id = app.create_quiz(json!({})).await;
    let other_quiz = app.create_quiz(json!({ "title": "Other" })).await;
    let question = app.add_true_false(quiz_id, true, 1).await;
    let foreign = app.add_true_false(other_quiz, true, 1).await;
    let token = app.student().await;
    let attempt = app.start(&token, quiz_id).await;

    // Question from another quiz
    let response = app
        .submit(
            &token,
            attempt,
            json!([
                { "question": question, "selected_option": false },
                { "question": foreign, "selected_option": true },
            ]),
        )
        .await;
    assert_eq!(response.status().as_u16(), 400);

    // Same question twice
    let response = app
        .submit(
            &token,
            attempt,
            json!([
                { "question": question, "selected_option": false },
                { "question": question, "selected_option": true },
            ]),
        )
        .await;
    assert_eq!(response.status().as_u16(), 400);

    let view: Value = app
        .submit(&token, attempt, json!([{ "question": question, "selected_option": true }]))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(view["submitted"], true);
    assert_eq!(view["total_score"], 1);
    assert_eq!(view["answers"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn attempts_of_other_students_look_missing() {
    let app = spawn_app().await;
    let quiz_id = app.create_quiz(json!({})).await;
    let question = app.add_true_false(quiz_id, true, 1).await;
    let owner = app.student().await;
    let intruder = app.student().await;
    let attempt = app.start(&owner, quiz_id).await;

    let response = app
        .submit(&intruder, attempt, json!([{ "question": question, "selected_option": true }]))
        .await;
    assert_eq!(response.status().as_u16(), 404);

    let response = app.get(&intruder, &format!("/api/attempts/{}", attempt)).await;
    assert_eq!(response.status().as_u16(), 404);

    let mine: Value = app.get(&intruder, "/api/attempts").await.json().await.unwrap();
    assert!(mine.as_array().unwrap().is_empty());

    let view: Value = app
        .get(&owner, &format!("/api/attempts/{}", attempt))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(view["submitted"], false);
}

#[tokio::test]
async fn deleting_a_question_rescores_attempts() {
    let app = spawn_app().await;
    let quiz_id = app.create_quiz(json!({})).await;
    let kept = app.add_true_false(quiz_id, true, 2).await;
    let dropped = app.add_true_false(quiz_id, true, 3).await;
    let token = app.student().await;
    let attempt = app.start(&token, quiz_id).await;

    let view: Value = app
        .submit(
            &token,
            attempt,
            json!([
                { "question": kept, "selected_option": true },
                { "question": dropped, "selected_option": true },
            ]),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(view["total_score"], 5);

    let response = app
        .client
        .delete(app.url(&format!("/api/admin/questions/{}", dropped)))
        .bearer_auth(&app.admin_token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 204);

    let view: Value = app
        .get(&token, &format!("/api/attempts/{}", attempt))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(view["total_score"], 2);
    assert_eq!(view["total_possible_points"], 2);
}

#[tokio::test]
async fn many_students_submit_at_once_on_a_shared_database() {
    let app = spawn_app_on_disk().await;
    let quiz_id = app.create_quiz(json!({})).await;
    let tf = app.add_true_false(quiz_id, true, 2).await;
    let code = app.add_sum_question(quiz_id, 5).await;

    let mut students = Vec::new();
    for _ in 0..16 {
        let token = app.quick_student().await;
        let attempt = app.start(&token, quiz_id).await;
        students.push((token, attempt));
    }

    let mut set = JoinSet::new();
    for (token, attempt) in students.clone() {
        let client = app.client.clone();
        let url = app.url(&format!("/api/attempts/{}/submit", attempt));
        set.spawn(async move {
            client
                .post(url)
                .bearer_auth(token)
                .json(&json!({ "answers": [
                    { "question": tf, "selected_option": true },
                    { "question": code, "code_submitted": SUM_PROGRAM },
                ] }))
                .send()
                .await
                .unwrap()
                .status()
                .as_u16()
        });
    }
    let statuses = set.join_all().await;
    assert!(statuses.iter().all(|s| *s == 200), "{:?}", statuses);

    for (token, attempt) in &students {
        let view = app.wait_for_grading(token, *attempt).await;
        assert_eq!(view["total_score"], 7);
    }
}
