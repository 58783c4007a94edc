// src/routes.rs

use axum::{
    Router,
    http::Method,
    middleware,
    routing::{delete, get, post},
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{live, participant, quiz},
    state::AppState,
    utils::jwt::{auth_middleware, optional_auth_middleware},
};

/// Assembles the main application router.
///
/// * Owner routes require a bearer token.
/// * Participant routes accept anonymous callers and pick up the identity
///   when a token is present.
/// * Read-only live views are public.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ]);

    let owner_routes = Router::new()
        .route("/", post(quiz::create_quiz).get(quiz::list_quizzes))
        .route(
            "/{id}",
            get(quiz::get_quiz)
                .put(quiz::update_quiz)
                .delete(quiz::delete_quiz),
        )
        .route("/{id}/publish", post(quiz::publish_quiz))
        .route("/{id}/start", post(quiz::start_quiz))
        .route("/{id}/end", post(quiz::end_quiz))
        .route("/{id}/questions/{question}/push", post(quiz::push_question))
        .route(
            "/{id}/questions/{question}/votes",
            get(quiz::question_votes),
        )
        .route(
            "/{id}/participants",
            get(quiz::list_participants).delete(quiz::clear_participants),
        )
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let participant_routes = Router::new()
        .route("/{id}/answers", post(participant::submit_answer))
        .route(
            "/{id}/participants/{participant_id}",
            delete(participant::leave_quiz),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            optional_auth_middleware,
        ));

    let public_routes = Router::new()
        .route("/{id}/current", get(participant::current_question))
        .route("/{id}/leaderboard", get(participant::leaderboard))
        .route("/{id}/live", get(live::live_room));

    let join_routes = Router::new()
        .route("/", post(participant::join_quiz))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            optional_auth_middleware,
        ))
        .route("/{code}", get(participant::lookup_join_code));

    Router::new()
        .nest(
            "/api/quizzes",
            owner_routes.merge(participant_routes).merge(public_routes),
        )
        .nest("/api/join", join_routes)
        // Global Middleware (applied from outside in)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
