// tests/api_tests.rs

use lms_backend::{config::Config, routes, state::AppState, utils::jwt::sign_jwt};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Helper function to spawn the app on a random port for testing.
/// Returns the base URL (e.g., "http://127.0.0.1:12345"), or None when no
/// DATABASE_URL is configured (tests are skipped in that case).
async fn spawn_app() -> Option<String> {
    // Note: For Postgres, you must have a running database.
    // We'll read from DATABASE_URL environment variable.
    let database_url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => return None,
    };

    // 1. Create a pool
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await
        .expect("Failed to connect to Postgres for testing. Make sure DATABASE_URL is set.");

    // 2. Run migrations
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to migrate database");

    // 3. Create test configuration and state
    let config = Config {
        database_url: database_url.clone(),
        jwt_secret: "test_secret_for_integration_tests".to_string(),
        jwt_expiration: 600, // 10 minutes for tests
        rust_log: "error".to_string(),
        admin_username: None,
        admin_password: None,
    };

    let state = AppState { pool, config };

    // 4. Create the router with the app state
    let app = routes::create_router(state);

    // 5. Bind to port 0 to get a random available port
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");

    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    // 6. Spawn the server in the background
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Some(address)
}

fn unique_name(prefix: &str) -> String {
    format!("{}_{}", prefix, &uuid::Uuid::new_v4().to_string()[..8])
}

/// Registers a fresh user with the given role and returns its bearer token.
async fn register_and_login(client: &reqwest::Client, address: &str, role: &str) -> String {
    let username = unique_name(role);

    let response = client
        .post(format!("{}/api/auth/register", address))
        .json(&serde_json::json!({
            "username": username,
            "email": format!("{}@example.com", username),
            "password": "password123",
            "full_name": "Test User",
            "role": role,
        }))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 201);

    let response = client
        .post(format!("{}/api/auth/login", address))
        .json(&serde_json::json!({
            "username": username,
            "password": "password123",
        }))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 200);

    let body: serde_json::Value = response.json().await.unwrap();
    body["token"].as_str().unwrap().to_string()
}

/// Instructor-side setup: one course with one quiz of two multiple-choice
/// questions (10 points each, first option correct).
async fn setup_course_with_quiz(
    client: &reqwest::Client,
    address: &str,
    token: &str,
    max_attempts: i32,
) -> (i64, i64) {
    let response = client
        .post(format!("{}/api/manage/courses", address))
        .bearer_auth(token)
        .json(&serde_json::json!({ "title": unique_name("course") }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);
    let course: serde_json::Value = response.json().await.unwrap();
    let course_id = course["id"].as_i64().unwrap();

    let response = client
        .post(format!("{}/api/manage/courses/{}/quizzes", address, course_id))
        .bearer_auth(token)
        .json(&serde_json::json!({
            "title": "Checkpoint",
            "total_points": 100,
            "passing_score": 60,
            "max_attempts": max_attempts,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);
    let quiz: serde_json::Value = response.json().await.unwrap();
    let quiz_id = quiz["id"].as_i64().unwrap();

    for order in 1..=2 {
        let response = client
            .post(format!("{}/api/manage/quizzes/{}/questions", address, quiz_id))
            .bearer_auth(token)
            .json(&serde_json::json!({
                "question_text": format!("Question {}", order),
                "question_type": "multiple_choice",
                "points": 10,
                "order_number": order,
                "options": [
                    { "option_text": "Right", "is_correct": true },
                    { "option_text": "Wrong" },
                ],
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 201);
    }

    (course_id, quiz_id)
}

async fn enroll(client: &reqwest::Client, address: &str, token: &str, course_id: i64) {
    let response = client
        .post(format!("{}/api/courses/{}/enroll", address, course_id))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);
}

/// Starts an attempt and returns (attempt_id, questions).
async fn start_attempt(
    client: &reqwest::Client,
    address: &str,
    token: &str,
    quiz_id: i64,
) -> (i64, Vec<serde_json::Value>) {
    let response = client
        .post(format!("{}/api/quizzes/{}/attempts", address, quiz_id))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);
    let body: serde_json::Value = response.json().await.unwrap();
    let attempt_id = body["attempt"]["id"].as_i64().unwrap();
    let questions = body["questions"].as_array().unwrap().clone();
    (attempt_id, questions)
}

/// Builds a submission picking the correct option for the first
/// `correct_count` questions and a wrong one for the rest.
fn build_answers(questions: &[serde_json::Value], correct_count: usize) -> serde_json::Value {
    let mut answers = serde_json::Map::new();
    for (i, question) in questions.iter().enumerate() {
        let options = question["options"].as_array().unwrap();
        let option = if i < correct_count { &options[0] } else { &options[1] };
        answers.insert(
            question["id"].as_i64().unwrap().to_string(),
            serde_json::json!({ "selected_option_id": option["id"].as_i64().unwrap() }),
        );
    }
    serde_json::json!({ "answers": answers })
}

/// Direct database handle for assertions and fixtures the HTTP surface
/// does not expose (admin promotion, achievement definitions).
async fn test_pool() -> PgPool {
    let database_url = std::env::var("DATABASE_URL").expect("spawn_app checked this");
    PgPoolOptions::new()
        .max_connections(1)
        .connect(&database_url)
        .await
        .expect("Failed to connect to Postgres for testing")
}

async fn user_id(client: &reqwest::Client, address: &str, token: &str) -> i64 {
    let response = client
        .get(format!("{}/api/auth/me", address))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = response.json().await.unwrap();
    body["id"].as_i64().unwrap()
}

/// Registration never hands out the admin role, so tests promote a fresh
/// user directly and sign a token with the app's test secret. Returns the
/// admin's id and token.
async fn make_admin(client: &reqwest::Client, address: &str, pool: &PgPool) -> (i64, String) {
    let token = register_and_login(client, address, "instructor").await;
    let id = user_id(client, address, &token).await;

    sqlx::query("UPDATE users SET role = 'admin' WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .unwrap();

    let token = sign_jwt(id, "admin", "test_secret_for_integration_tests", 600).unwrap();
    (id, token)
}

/// Takes the quiz once with every answer correct, completing a course
/// whose only component it is.
async fn pass_quiz(client: &reqwest::Client, address: &str, token: &str, quiz_id: i64) {
    let (attempt_id, questions) = start_attempt(client, address, token, quiz_id).await;
    let response = client
        .post(format!("{}/api/attempts/{}/submit", address, attempt_id))
        .bearer_auth(token)
        .json(&build_answers(&questions, questions.len()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let Some(address) = spawn_app().await else { return };
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/random_path_that_does_not_exist", address))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn register_fails_validation() {
    let Some(address) = spawn_app().await else { return };
    let client = reqwest::Client::new();

    // Username too short and email malformed.
    let response = client
        .post(format!("{}/api/auth/register", address))
        .json(&serde_json::json!({
            "username": "yo",
            "email": "not-an-email",
            "password": "password123",
            "full_name": "Test User",
        }))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn duplicate_username_conflicts() {
    let Some(address) = spawn_app().await else { return };
    let client = reqwest::Client::new();
    let username = unique_name("dup");

    let payload = serde_json::json!({
        "username": username,
        "email": format!("{}@example.com", username),
        "password": "password123",
        "full_name": "Test User",
    });

    let first = client
        .post(format!("{}/api/auth/register", address))
        .json(&payload)
        .send()
        .await
        .unwrap();
    assert_eq!(first.status().as_u16(), 201);

    let second = client
        .post(format!("{}/api/auth/register", address))
        .json(&payload)
        .send()
        .await
        .unwrap();
    assert_eq!(second.status().as_u16(), 409);
}

#[tokio::test]
async fn quiz_attempt_lifecycle() {
    let Some(address) = spawn_app().await else { return };
    let client = reqwest::Client::new();

    let instructor = register_and_login(&client, &address, "instructor").await;
    let student = register_and_login(&client, &address, "student").await;
    let (course_id, quiz_id) = setup_course_with_quiz(&client, &address, &instructor, 2).await;
    enroll(&client, &address, &student, course_id).await;

    // First attempt.
    let (attempt_id, questions) = start_attempt(&client, &address, &student, quiz_id).await;
    assert_eq!(questions.len(), 2);

    // Starting again while one is open conflicts.
    let response = client
        .post(format!("{}/api/quizzes/{}/attempts", address, quiz_id))
        .bearer_auth(&student)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 409);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["kind"], "conflict");

    // One right, one wrong: 10/20 points = 50%, below the 60% bar.
    let response = client
        .post(format!("{}/api/attempts/{}/submit", address, attempt_id))
        .bearer_auth(&student)
        .json(&build_answers(&questions, 1))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["score"].as_f64().unwrap(), 50.0);
    assert_eq!(body["passed"], false);

    // Submitting the same attempt twice is rejected.
    let response = client
        .post(format!("{}/api/attempts/{}/submit", address, attempt_id))
        .bearer_auth(&student)
        .json(&build_answers(&questions, 1))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 409);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["kind"], "invalid_state");

    // Second attempt, all correct: passes and completes the course (the
    // quiz is its only component).
    let (attempt_id, questions) = start_attempt(&client, &address, &student, quiz_id).await;
    let response = client
        .post(format!("{}/api/attempts/{}/submit", address, attempt_id))
        .bearer_auth(&student)
        .json(&build_answers(&questions, 2))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["score"].as_f64().unwrap(), 100.0);
    assert_eq!(body["passed"], true);
    assert_eq!(body["course_progress"].as_f64().unwrap(), 100.0);

    // The cap is reached now.
    let response = client
        .post(format!("{}/api/quizzes/{}/attempts", address, quiz_id))
        .bearer_auth(&student)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 409);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["kind"], "limit_exceeded");
}

#[tokio::test]
async fn short_answer_grading_completes_the_score() {
    let Some(address) = spawn_app().await else { return };
    let client = reqwest::Client::new();

    let instructor = register_and_login(&client, &address, "instructor").await;
    let student = register_and_login(&client, &address, "student").await;

    let response = client
        .post(format!("{}/api/manage/courses", address))
        .bearer_auth(&instructor)
        .json(&serde_json::json!({ "title": unique_name("course") }))
        .send()
        .await
        .unwrap();
    let course: serde_json::Value = response.json().await.unwrap();
    let course_id = course["id"].as_i64().unwrap();

    let response = client
        .post(format!("{}/api/manage/courses/{}/quizzes", address, course_id))
        .bearer_auth(&instructor)
        .json(&serde_json::json!({
            "title": "Essay checkpoint",
            "total_points": 100,
            "passing_score": 60,
        }))
        .send()
        .await
        .unwrap();
    let quiz: serde_json::Value = response.json().await.unwrap();
    let quiz_id = quiz["id"].as_i64().unwrap();

    let response = client
        .post(format!("{}/api/manage/quizzes/{}/questions", address, quiz_id))
        .bearer_auth(&instructor)
        .json(&serde_json::json!({
            "question_text": "Pick one",
            "question_type": "multiple_choice",
            "points": 10,
            "order_number": 1,
            "options": [
                { "option_text": "Right", "is_correct": true },
                { "option_text": "Wrong" },
            ],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);

    let response = client
        .post(format!("{}/api/manage/quizzes/{}/questions", address, quiz_id))
        .bearer_auth(&instructor)
        .json(&serde_json::json!({
            "question_text": "Explain it",
            "question_type": "short_answer",
            "points": 10,
            "order_number": 2,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);

    enroll(&client, &address, &student, course_id).await;
    let (attempt_id, questions) = start_attempt(&client, &address, &student, quiz_id).await;

    let mut answers = serde_json::Map::new();
    for question in &questions {
        let id = question["id"].as_i64().unwrap().to_string();
        if question["question_type"] == "multiple_choice" {
            let option_id = question["options"][0]["id"].as_i64().unwrap();
            answers.insert(id, serde_json::json!({ "selected_option_id": option_id }));
        } else {
            answers.insert(id, serde_json::json!({ "answer_text": "Because reasons." }));
        }
    }

    // Provisional score: only the objective half counts so far.
    let response = client
        .post(format!("{}/api/attempts/{}/submit", address, attempt_id))
        .bearer_auth(&student)
        .json(&serde_json::json!({ "answers": answers }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["score"].as_f64().unwrap(), 50.0);
    assert_eq!(body["pending_manual_grading"].as_i64().unwrap(), 1);

    // The reviewer sees exactly one pending answer.
    let response = client
        .get(format!("{}/api/manage/quizzes/{}/pending-answers", address, quiz_id))
        .bearer_auth(&instructor)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let pending: Vec<serde_json::Value> = response.json().await.unwrap();
    assert_eq!(pending.len(), 1);
    let answer_id = pending[0]["answer_id"].as_i64().unwrap();

    // Full credit on the short answer finishes grading at 100%.
    let response = client
        .put(format!("{}/api/manage/answers/{}/grade", address, answer_id))
        .bearer_auth(&instructor)
        .json(&serde_json::json!({ "is_correct": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["score"].as_f64().unwrap(), 100.0);
    assert_eq!(body["fully_graded"], true);
    assert_eq!(body["passed"], true);

    // Out-of-range points are rejected.
    let response = client
        .put(format!("{}/api/manage/answers/{}/grade", address, answer_id))
        .bearer_auth(&instructor)
        .json(&serde_json::json!({ "is_correct": true, "points_awarded": 50.0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn passing_score_cannot_exceed_total_points() {
    let Some(address) = spawn_app().await else { return };
    let client = reqwest::Client::new();

    let instructor = register_and_login(&client, &address, "instructor").await;
    let response = client
        .post(format!("{}/api/manage/courses", address))
        .bearer_auth(&instructor)
        .json(&serde_json::json!({ "title": unique_name("course") }))
        .send()
        .await
        .unwrap();
    let course: serde_json::Value = response.json().await.unwrap();

    let response = client
        .post(format!(
            "{}/api/manage/courses/{}/quizzes",
            address,
            course["id"].as_i64().unwrap()
        ))
        .bearer_auth(&instructor)
        .json(&serde_json::json!({
            "title": "Impossible",
            "total_points": 100,
            "passing_score": 150,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn certificate_requires_full_progress() {
    let Some(address) = spawn_app().await else { return };
    let client = reqwest::Client::new();

    let instructor = register_and_login(&client, &address, "instructor").await;
    let student = register_and_login(&client, &address, "student").await;
    let (course_id, _quiz_id) = setup_course_with_quiz(&client, &address, &instructor, 3).await;

    // Add a lesson so the course has two components.
    let response = client
        .post(format!("{}/api/manage/courses/{}/lessons", address, course_id))
        .bearer_auth(&instructor)
        .json(&serde_json::json!({ "title": "Intro", "order_number": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);
    let lesson: serde_json::Value = response.json().await.unwrap();

    enroll(&client, &address, &student, course_id).await;

    // Nothing done yet: not eligible.
    let response = client
        .post(format!("{}/api/courses/{}/certificate-requests", address, course_id))
        .bearer_auth(&student)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 409);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["kind"], "invalid_state");

    // Completing the lesson gets halfway; still not eligible.
    let response = client
        .post(format!(
            "{}/api/lessons/{}/complete",
            address,
            lesson["id"].as_i64().unwrap()
        ))
        .bearer_auth(&student)
        .json(&serde_json::json!({ "time_spent_minutes": 5 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["course_progress"].as_f64().unwrap(), 50.0);

    let response = client
        .post(format!("{}/api/courses/{}/certificate-requests", address, course_id))
        .bearer_auth(&student)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 409);
}

#[tokio::test]
async fn verify_unknown_certificate_is_404() {
    let Some(address) = spawn_app().await else { return };
    let client = reqwest::Client::new();

    // Well-formed but never issued.
    let response = client
        .get(format!(
            "{}/api/certificates/verify/CERT-20240101120000-AAAAAA",
            address
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);

    // Malformed code, same answer.
    let response = client
        .get(format!("{}/api/certificates/verify/not-a-code", address))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn students_cannot_reach_admin_routes() {
    let Some(address) = spawn_app().await else { return };
    let client = reqwest::Client::new();

    let student = register_and_login(&client, &address, "student").await;
    let response = client
        .post(format!("{}/api/admin/achievements", address))
        .bearer_auth(&student)
        .json(&serde_json::json!({
            "name": "First Steps",
            "criteria_type": "participation",
            "criteria_value": 1,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 403);
}

#[tokio::test]
async fn instructor_routes_require_the_role() {
    let Some(address) = spawn_app().await else { return };
    let client = reqwest::Client::new();

    let student = register_and_login(&client, &address, "student").await;
    let response = client
        .post(format!("{}/api/manage/courses", address))
        .bearer_auth(&student)
        .json(&serde_json::json!({ "title": "Sneaky" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 403);
}

#[tokio::test]
async fn repeated_certificate_requests_are_idempotent() {
    let Some(address) = spawn_app().await else { return };
    let client = reqwest::Client::new();
    let pool = test_pool().await;

    let instructor = register_and_login(&client, &address, "instructor").await;
    let student = register_and_login(&client, &address, "student").await;
    let (course_id, quiz_id) = setup_course_with_quiz(&client, &address, &instructor, 3).await;
    enroll(&client, &address, &student, course_id).await;
    pass_quiz(&client, &address, &student, quiz_id).await;

    // First request creates a pending row.
    let response = client
        .post(format!("{}/api/courses/{}/certificate-requests", address, course_id))
        .bearer_auth(&student)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);
    let first: serde_json::Value = response.json().await.unwrap();
    assert_eq!(first["status"], "pending");
    let request_id = first["id"].as_i64().unwrap();

    // Asking again returns the same request unchanged, not a conflict.
    let response = client
        .post(format!("{}/api/courses/{}/certificate-requests", address, course_id))
        .bearer_auth(&student)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let second: serde_json::Value = response.json().await.unwrap();
    assert_eq!(second["id"].as_i64().unwrap(), request_id);
    assert_eq!(second["status"], "pending");

    // Once approved and issued, a further request hands back the
    // certificate itself.
    let (_, admin) = make_admin(&client, &address, &pool).await;
    let response = client
        .post(format!(
            "{}/api/admin/certificate-requests/{}/approve",
            address, request_id
        ))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);

    let response = client
        .post(format!("{}/api/courses/{}/certificate-requests", address, course_id))
        .bearer_auth(&student)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["certificate_code"].is_string());
}

#[tokio::test]
async fn objective_answers_cannot_be_graded_manually() {
    let Some(address) = spawn_app().await else { return };
    let client = reqwest::Client::new();

    let instructor = register_and_login(&client, &address, "instructor").await;
    let student = register_and_login(&client, &address, "student").await;
    let (course_id, quiz_id) = setup_course_with_quiz(&client, &address, &instructor, 3).await;
    enroll(&client, &address, &student, course_id).await;

    let (attempt_id, questions) = start_attempt(&client, &address, &student, quiz_id).await;
    let response = client
        .post(format!("{}/api/attempts/{}/submit", address, attempt_id))
        .bearer_auth(&student)
        .json(&build_answers(&questions, 2))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    // The reviewer pulls the stored answers and tries to override one of
    // the auto-graded ones.
    let response = client
        .get(format!("{}/api/attempts/{}/results", address, attempt_id))
        .bearer_auth(&instructor)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let results: serde_json::Value = response.json().await.unwrap();
    let answer_id = results["answers"][0]["id"].as_i64().unwrap();

    let response = client
        .put(format!("{}/api/manage/answers/{}/grade", address, answer_id))
        .bearer_auth(&instructor)
        .json(&serde_json::json!({ "is_correct": false }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 409);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["kind"], "invalid_state");
}

#[tokio::test]
async fn lesson_views_feed_achievement_evaluation() {
    let Some(address) = spawn_app().await else { return };
    let client = reqwest::Client::new();
    let pool = test_pool().await;

    // One participation badge that a single view satisfies.
    let badge_name = unique_name("early_bird");
    sqlx::query(
        "INSERT INTO achievements (name, description, criteria_type, criteria_value)
         VALUES ($1, 'View a lesson', 'participation', 1)",
    )
    .bind(&badge_name)
    .execute(&pool)
    .await
    .unwrap();

    let instructor = register_and_login(&client, &address, "instructor").await;
    let student = register_and_login(&client, &address, "student").await;
    let student_id = user_id(&client, &address, &student).await;

    let response = client
        .post(format!("{}/api/manage/courses", address))
        .bearer_auth(&instructor)
        .json(&serde_json::json!({ "title": unique_name("course") }))
        .send()
        .await
        .unwrap();
    let course: serde_json::Value = response.json().await.unwrap();
    let course_id = course["id"].as_i64().unwrap();

    let response = client
        .post(format!("{}/api/manage/courses/{}/lessons", address, course_id))
        .bearer_auth(&instructor)
        .json(&serde_json::json!({ "title": "Intro", "order_number": 1 }))
        .send()
        .await
        .unwrap();
    let lesson: serde_json::Value = response.json().await.unwrap();
    let lesson_id = lesson["id"].as_i64().unwrap();

    enroll(&client, &address, &student, course_id).await;

    // Reading the lesson (no completion) must be enough to earn the badge.
    let response = client
        .get(format!("{}/api/lessons/{}", address, lesson_id))
        .bearer_auth(&student)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let earned: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM student_achievements sa
         JOIN achievements a ON sa.achievement_id = a.id
         WHERE sa.student_id = $1 AND a.name = $2",
    )
    .bind(student_id)
    .bind(&badge_name)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(earned, 1);

    // A second view is a no-op and cannot double-award.
    let response = client
        .get(format!("{}/api/lessons/{}", address, lesson_id))
        .bearer_auth(&student)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
async fn assignment_grading_recomputes_progress() {
    let Some(address) = spawn_app().await else { return };
    let client = reqwest::Client::new();
    let pool = test_pool().await;

    let instructor = register_and_login(&client, &address, "instructor").await;
    let student = register_and_login(&client, &address, "student").await;
    let student_id = user_id(&client, &address, &student).await;

    let response = client
        .post(format!("{}/api/manage/courses", address))
        .bearer_auth(&instructor)
        .json(&serde_json::json!({ "title": unique_name("course") }))
        .send()
        .await
        .unwrap();
    let course: serde_json::Value = response.json().await.unwrap();
    let course_id = course["id"].as_i64().unwrap();

    let response = client
        .post(format!("{}/api/manage/courses/{}/assignments", address, course_id))
        .bearer_auth(&instructor)
        .json(&serde_json::json!({ "title": "Essay", "total_points": 100 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);
    let assignment: serde_json::Value = response.json().await.unwrap();
    let assignment_id = assignment["id"].as_i64().unwrap();

    enroll(&client, &address, &student, course_id).await;

    // The assignment is the only component, so submitting completes the
    // course.
    let response = client
        .post(format!("{}/api/assignments/{}/submit", address, assignment_id))
        .bearer_auth(&student)
        .json(&serde_json::json!({ "submission_text": "My essay." }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["course_progress"].as_f64().unwrap(), 100.0);

    let submission_id: i64 = sqlx::query_scalar(
        "SELECT id FROM assignment_submissions WHERE assignment_id = $1 AND student_id = $2",
    )
    .bind(assignment_id)
    .bind(student_id)
    .fetch_one(&pool)
    .await
    .unwrap();

    let response = client
        .put(format!("{}/api/manage/submissions/{}/grade", address, submission_id))
        .bearer_auth(&instructor)
        .json(&serde_json::json!({ "grade": 80.0, "feedback": "Solid." }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    // Grading re-ran the aggregation: the completed state survives it.
    let response = client
        .get(format!("{}/api/courses/{}/progress", address, course_id))
        .bearer_auth(&student)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["progress_percentage"].as_f64().unwrap(), 100.0);
    assert_eq!(body["status"], "completed");
}

#[tokio::test]
async fn direct_issuance_settles_the_open_request() {
    let Some(address) = spawn_app().await else { return };
    let client = reqwest::Client::new();
    let pool = test_pool().await;

    let instructor = register_and_login(&client, &address, "instructor").await;
    let student = register_and_login(&client, &address, "student").await;
    let student_id = user_id(&client, &address, &student).await;
    let (course_id, quiz_id) = setup_course_with_quiz(&client, &address, &instructor, 3).await;
    enroll(&client, &address, &student, course_id).await;
    pass_quiz(&client, &address, &student, quiz_id).await;

    let response = client
        .post(format!("{}/api/courses/{}/certificate-requests", address, course_id))
        .bearer_auth(&student)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);

    // Direct issuance bypasses the queue but must settle the open request
    // and record who reviewed it.
    let (admin_id, admin) = make_admin(&client, &address, &pool).await;
    let response = client
        .post(format!("{}/api/admin/certificates", address))
        .bearer_auth(&admin)
        .json(&serde_json::json!({
            "student_id": student_id,
            "course_id": course_id,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);

    let (status, reviewed_by): (String, Option<i64>) = sqlx::query_as(
        "SELECT status, reviewed_by FROM certificate_requests
         WHERE student_id = $1 AND course_id = $2",
    )
    .bind(student_id)
    .bind(course_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(status, "approved");
    assert_eq!(reviewed_by, Some(admin_id));
}
