use crate::{
    conversation::{conversation_dto::*, conversation_handlers as handlers},
    middleware::auth_middleware,
    state::AppState,
    websocket::{self, types::*},
};
use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::create_conversation,
        handlers::get_conversation,
        handlers::list_conversations,
        handlers::send_message,
        handlers::edit_message,
        handlers::delete_message,
        handlers::list_messages,
        handlers::add_participants,
        handlers::get_participants,
        handlers::leave_conversation,
        handlers::archive_conversation,
        handlers::mark_conversation_read,
        handlers::get_unread_count,
        handlers::rate_conversation,
        handlers::list_ratings,
        websocket::handler::ws_handler,
    ),
    components(
        schemas(
            CreateConversationRequest,
            SendMessageRequest,
            EditMessageRequest,
            AddParticipantsRequest,
            CreateRatingRequest,
            ConversationResponse,
            MessageResponse,
            ParticipantResponse,
            RatingResponse,
            MarkReadResponse,
            ConversationUnread,
            UnreadCountResponse,
            ServerEvent,
            MembershipPayload,
            ReadReceiptPayload,
            ErrorPayload,
        )
    ),
    tags(
        (name = "conversations", description = "Conversation lifecycle and read state"),
        (name = "messages", description = "Conversation messages"),
        (name = "participants", description = "Conversation membership"),
        (name = "ratings", description = "Conversation feedback"),
        (name = "realtime", description = "WebSocket hub")
    ),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::Http::new(
                        utoipa::openapi::security::HttpAuthScheme::Bearer,
                    ),
                ),
            )
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let conversation_routes = Router::new()
        .route(
            "/",
            get(handlers::list_conversations).post(handlers::create_conversation),
        )
        .route("/:id", get(handlers::get_conversation))
        .route(
            "/:id/messages",
            get(handlers::list_messages).post(handlers::send_message),
        )
        .route(
            "/:id/messages/:message_id",
            put(handlers::edit_message).delete(handlers::delete_message),
        )
        .route(
            "/:id/participants",
            get(handlers::get_participants).post(handlers::add_participants),
        )
        .route("/:id/leave", post(handlers::leave_conversation))
        .route("/:id/archive", post(handlers::archive_conversation))
        .route("/:id/mark-read", put(handlers::mark_conversation_read))
        .route(
            "/:id/ratings",
            get(handlers::list_ratings).post(handlers::rate_conversation),
        );

    // Everything under /api requires a tenant-scoped identity
    let api_routes = Router::new()
        .nest("/conversations", conversation_routes)
        .route("/unread-count", get(handlers::get_unread_count))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let ws_routes = Router::new()
        .route("/ws", get(websocket::ws_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .nest("/api", api_routes)
        .merge(ws_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
