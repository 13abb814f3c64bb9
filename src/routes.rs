// src/routes.rs

use axum::{
    Router, http::Method, middleware,
    routing::{delete, get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{achievements, assignments, auth, certificates, courses, grading, lessons, quizzes},
    state::AppState,
    utils::jwt::{admin_middleware, auth_middleware, instructor_middleware},
};

/// Assembles the main application router.
///
/// * Merges all sub-routers (auth, courses, quizzes, grading, achievements,
///   certificates).
/// * Applies global middleware (Trace, CORS).
/// * Injects global state (Database Pool + Config).
pub fn create_router(state: AppState) -> Router {
    let origins = [
        "http://localhost:3000".parse().unwrap(),
        "http://127.0.0.1:3000".parse().unwrap(),
    ];

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ]);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .merge(
            Router::new()
                .route("/me", get(auth::me))
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    auth_middleware,
                )),
        );

    // Everything a logged-in student (or instructor) can reach.
    let course_routes = Router::new()
        .route("/", get(courses::list_courses))
        .route("/{id}", get(courses::get_course))
        .route("/{id}/enroll", post(courses::enroll))
        .route("/{id}/progress", get(courses::course_progress))
        .route("/{id}/lessons", get(lessons::list_lessons))
        .route("/{id}/assignments", get(assignments::list_assignments))
        .route(
            "/{id}/certificate-requests",
            post(certificates::request_certificate),
        )
        .route("/{id}/certificate", get(certificates::certificate_status));

    let lesson_routes = Router::new()
        .route("/{id}", get(lessons::view_lesson))
        .route("/{id}/complete", post(lessons::complete_lesson));

    let quiz_routes = Router::new()
        .route("/{id}", get(quizzes::get_quiz))
        .route("/{id}/attempts", post(quizzes::start_attempt).get(quizzes::my_attempts));

    let attempt_routes = Router::new()
        .route("/{id}/submit", post(quizzes::submit_attempt))
        .route("/{id}/results", get(quizzes::attempt_results));

    let assignment_routes =
        Router::new().route("/{id}/submit", post(assignments::submit_assignment));

    let achievement_routes = Router::new()
        .route("/", get(achievements::list_achievements))
        .route("/mine", get(achievements::my_achievements));

    let student_routes = Router::new()
        .route("/enrollments", get(courses::my_enrollments))
        .route("/certificates", get(certificates::my_certificates));

    // Course authoring and grading.
    let instructor_routes = Router::new()
        .route("/courses", post(courses::create_course))
        .route("/courses/{id}/lessons", post(lessons::create_lesson))
        .route("/courses/{id}/quizzes", post(quizzes::create_quiz))
        .route("/courses/{id}/assignments", post(assignments::create_assignment))
        .route("/quizzes/{id}", put(quizzes::update_quiz))
        .route("/quizzes/{id}/questions", post(quizzes::add_question))
        .route("/questions/{id}", delete(quizzes::delete_question))
        .route("/quizzes/{id}/pending-answers", get(grading::pending_answers))
        .route("/answers/{id}/grade", put(grading::grade_answer))
        .route(
            "/submissions/{id}/grade",
            put(assignments::grade_submission),
        )
        .layer(middleware::from_fn(instructor_middleware));

    let admin_routes = Router::new()
        .route("/achievements", post(achievements::create_achievement))
        .route(
            "/certificate-requests",
            get(certificates::list_requests),
        )
        .route(
            "/certificate-requests/{id}/approve",
            post(certificates::approve_request),
        )
        .route(
            "/certificate-requests/{id}/reject",
            post(certificates::reject_request),
        )
        .route("/certificates", post(certificates::issue_certificate))
        .route(
            "/certificates/{id}",
            delete(certificates::revoke_certificate),
        )
        .layer(middleware::from_fn(admin_middleware));

    let protected = Router::new()
        .nest("/courses", course_routes)
        .nest("/lessons", lesson_routes)
        .nest("/quizzes", quiz_routes)
        .nest("/attempts", attempt_routes)
        .nest("/assignments", assignment_routes)
        .nest("/achievements", achievement_routes)
        .nest("/me", student_routes)
        .nest("/manage", instructor_routes)
        .nest("/admin", admin_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .nest("/api/auth", auth_routes)
        // Public verification endpoint, deliberately outside auth.
        .route(
            "/api/certificates/verify/{code}",
            get(certificates::verify_certificate),
        )
        .nest("/api", protected)
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
