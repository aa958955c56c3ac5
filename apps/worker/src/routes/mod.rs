pub mod events;
pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route(
            "/api/v1/events",
            get(events::handle_list_events).post(events::handle_create_event),
        )
        .route(
            "/api/v1/events/:id",
            get(events::handle_get_event)
                .patch(events::handle_update_event)
                .delete(events::handle_delete_event),
        )
        .route(
            "/api/v1/events/:id/history",
            get(events::handle_event_history),
        )
        .route(
            "/api/v1/events/:id/registrations",
            get(events::handle_list_registrations).post(events::handle_create_registration),
        )
        .route(
            "/api/v1/events/:id/registrations/:registration_id/certificate",
            get(events::handle_certificate_url),
        )
        .route(
            "/api/v1/events/:id/template",
            post(events::handle_template_upload_url),
        )
        .route(
            "/api/v1/events/:id/certificates",
            post(events::handle_enqueue_certificates),
        )
        .with_state(state)
}
