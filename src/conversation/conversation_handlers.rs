use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::{AppError, Result},
    middleware::{AppJson, AuthUser},
    state::AppState,
    websocket::types::{ReadReceiptPayload, ServerEvent},
};

use super::conversation_dto::{
    AddParticipantsRequest, ConversationResponse, CreateConversationRequest, CreateRatingRequest,
    EditMessageRequest, MarkReadResponse, MessageResponse, PageQuery, Pagination,
    ParticipantResponse, RatingResponse, SendMessageRequest, UnreadCountResponse,
};

/// Start a new conversation
#[utoipa::path(
    post,
    path = "/api/conversations",
    tag = "conversations",
    request_body = CreateConversationRequest,
    responses(
        (status = 201, description = "Conversation created", body = ConversationResponse),
        (status = 400, description = "Invalid input"),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn create_conversation(
    State(state): State<AppState>,
    user: AuthUser,
    AppJson(payload): AppJson<CreateConversationRequest>,
) -> Result<impl IntoResponse> {
    let conversation = state
        .conversation_service
        .create_conversation(user.tenant_id, payload, user.user_id)
        .await?;

    Ok((StatusCode::CREATED, Json(conversation)))
}

/// Get a conversation by id
#[utoipa::path(
    get,
    path = "/api/conversations/{id}",
    tag = "conversations",
    params(
        ("id" = Uuid, Path, description = "Conversation ID")
    ),
    responses(
        (status = 200, description = "Conversation found", body = ConversationResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Conversation not found")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn get_conversation(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ConversationResponse>> {
    let conversation = state
        .conversation_service
        .get_conversation(user.tenant_id, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Conversation not found".to_string()))?;

    Ok(Json(conversation))
}

/// List conversations by most recent activity
#[utoipa::path(
    get,
    path = "/api/conversations",
    tag = "conversations",
    params(
        ("pageNumber" = Option<u32>, Query, description = "Page number (default 1)"),
        ("pageSize" = Option<u32>, Query, description = "Items per page (default 10, max 100)")
    ),
    responses(
        (status = 200, description = "Page of conversations"),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn list_conversations(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse> {
    let page = state
        .conversation_service
        .list_conversations(user.tenant_id, Pagination::conversations(&query))
        .await?;

    Ok(Json(page))
}

/// Post a message to a conversation
#[utoipa::path(
    post,
    path = "/api/conversations/{id}/messages",
    tag = "messages",
    request_body = SendMessageRequest,
    params(
        ("id" = Uuid, Path, description = "Conversation ID")
    ),
    responses(
        (status = 201, description = "Message sent", body = MessageResponse),
        (status = 400, description = "Invalid input"),
        (status = 403, description = "Not a participant"),
        (status = 404, description = "Conversation not found"),
        (status = 409, description = "Conversation is archived"),
        (status = 429, description = "Sending too quickly")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn send_message(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    AppJson(payload): AppJson<SendMessageRequest>,
) -> Result<impl IntoResponse> {
    let message = state
        .conversation_service
        .send_message(user.tenant_id, id, payload, user.user_id)
        .await?;

    state
        .hub
        .publish(user.tenant_id, id, ServerEvent::MessageReceived(message.clone()));

    Ok((StatusCode::CREATED, Json(message)))
}

/// Edit one of your own messages
#[utoipa::path(
    put,
    path = "/api/conversations/{id}/messages/{message_id}",
    tag = "messages",
    request_body = EditMessageRequest,
    params(
        ("id" = Uuid, Path, description = "Conversation ID"),
        ("message_id" = Uuid, Path, description = "Message ID")
    ),
    responses(
        (status = 200, description = "Message edited", body = MessageResponse),
        (status = 400, description = "Invalid input"),
        (status = 403, description = "Not the sender"),
        (status = 404, description = "Message not found"),
        (status = 409, description = "Message has been deleted")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn edit_message(
    State(state): State<AppState>,
    user: AuthUser,
    Path((id, message_id)): Path<(Uuid, Uuid)>,
    AppJson(payload): AppJson<EditMessageRequest>,
) -> Result<Json<MessageResponse>> {
    let message = state
        .conversation_service
        .edit_message(user.tenant_id, id, message_id, payload, user.user_id)
        .await?;

    state
        .hub
        .publish(user.tenant_id, id, ServerEvent::MessageEdited(message.clone()));

    Ok(Json(message))
}

/// Delete one of your own messages
#[utoipa::path(
    delete,
    path = "/api/conversations/{id}/messages/{message_id}",
    tag = "messages",
    params(
        ("id" = Uuid, Path, description = "Conversation ID"),
        ("message_id" = Uuid, Path, description = "Message ID")
    ),
    responses(
        (status = 200, description = "Message deleted", body = MessageResponse),
        (status = 403, description = "Not the sender"),
        (status = 404, description = "Message not found")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn delete_message(
    State(state): State<AppState>,
    user: AuthUser,
    Path((id, message_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<MessageResponse>> {
    let message = state
        .conversation_service
        .delete_message(user.tenant_id, id, message_id, user.user_id)
        .await?;

    state
        .hub
        .publish(user.tenant_id, id, ServerEvent::MessageDeleted(message.clone()));

    Ok(Json(message))
}

/// List messages, newest page first
#[utoipa::path(
    get,
    path = "/api/conversations/{id}/messages",
    tag = "messages",
    params(
        ("id" = Uuid, Path, description = "Conversation ID"),
        ("pageNumber" = Option<u32>, Query, description = "Page number counted from the newest message (default 1)"),
        ("pageSize" = Option<u32>, Query, description = "Items per page (default 20, max 100)")
    ),
    responses(
        (status = 200, description = "Page of messages in ascending sent order"),
        (status = 404, description = "Conversation not found")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn list_messages(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse> {
    let page = state
        .conversation_service
        .list_messages(user.tenant_id, id, Pagination::messages(&query))
        .await?;

    Ok(Json(page))
}

/// Add participants to a conversation
#[utoipa::path(
    post,
    path = "/api/conversations/{id}/participants",
    tag = "participants",
    request_body = AddParticipantsRequest,
    params(
        ("id" = Uuid, Path, description = "Conversation ID")
    ),
    responses(
        (status = 200, description = "Updated participant list", body = Vec<ParticipantResponse>),
        (status = 400, description = "Invalid input"),
        (status = 403, description = "Not a participant"),
        (status = 404, description = "Conversation not found")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn add_participants(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    AppJson(payload): AppJson<AddParticipantsRequest>,
) -> Result<Json<Vec<ParticipantResponse>>> {
    payload.validate()?;

    let participants = state
        .conversation_service
        .add_participants(user.tenant_id, id, payload.user_ids, user.user_id)
        .await?;

    Ok(Json(participants))
}

/// List participants with their read state
#[utoipa::path(
    get,
    path = "/api/conversations/{id}/participants",
    tag = "participants",
    params(
        ("id" = Uuid, Path, description = "Conversation ID")
    ),
    responses(
        (status = 200, description = "Participants", body = Vec<ParticipantResponse>),
        (status = 404, description = "Conversation not found")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn get_participants(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<ParticipantResponse>>> {
    let participants = state
        .conversation_service
        .get_participants(user.tenant_id, id)
        .await?;

    Ok(Json(participants))
}

/// Leave a conversation
#[utoipa::path(
    post,
    path = "/api/conversations/{id}/leave",
    tag = "participants",
    params(
        ("id" = Uuid, Path, description = "Conversation ID")
    ),
    responses(
        (status = 204, description = "Left the conversation"),
        (status = 403, description = "Not a participant"),
        (status = 404, description = "Conversation not found")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn leave_conversation(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    state
        .conversation_service
        .leave_conversation(user.tenant_id, id, user.user_id)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Archive a conversation
#[utoipa::path(
    post,
    path = "/api/conversations/{id}/archive",
    tag = "conversations",
    params(
        ("id" = Uuid, Path, description = "Conversation ID")
    ),
    responses(
        (status = 200, description = "Conversation archived", body = ConversationResponse),
        (status = 403, description = "Not a participant"),
        (status = 404, description = "Conversation not found"),
        (status = 409, description = "Already archived")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn archive_conversation(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ConversationResponse>> {
    let conversation = state
        .conversation_service
        .archive_conversation(user.tenant_id, id, user.user_id)
        .await?;

    Ok(Json(conversation))
}

/// Mark a conversation as read
#[utoipa::path(
    put,
    path = "/api/conversations/{id}/mark-read",
    tag = "conversations",
    params(
        ("id" = Uuid, Path, description = "Conversation ID")
    ),
    responses(
        (status = 200, description = "Conversation marked as read", body = MarkReadResponse),
        (status = 403, description = "Not a participant"),
        (status = 404, description = "Conversation not found")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn mark_conversation_read(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<MarkReadResponse>> {
    let read_at = state
        .conversation_service
        .mark_conversation_as_read(user.tenant_id, id, user.user_id)
        .await?;

    state.hub.publish(
        user.tenant_id,
        id,
        ServerEvent::ConversationRead(ReadReceiptPayload {
            conversation_id: id,
            user_id: user.user_id,
            read_at,
        }),
    );

    Ok(Json(MarkReadResponse {
        conversation_id: id,
        last_read_at: read_at,
    }))
}

/// Unread messages across the caller's conversations
#[utoipa::path(
    get,
    path = "/api/unread-count",
    tag = "conversations",
    responses(
        (status = 200, description = "Unread totals", body = UnreadCountResponse),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn get_unread_count(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<UnreadCountResponse>> {
    let unread = state
        .conversation_service
        .get_unread_count(user.tenant_id, user.user_id)
        .await?;

    Ok(Json(unread))
}

/// Rate a conversation
#[utoipa::path(
    post,
    path = "/api/conversations/{id}/ratings",
    tag = "ratings",
    request_body = CreateRatingRequest,
    params(
        ("id" = Uuid, Path, description = "Conversation ID")
    ),
    responses(
        (status = 201, description = "Rating recorded", body = RatingResponse),
        (status = 400, description = "Score out of range"),
        (status = 403, description = "Not a participant"),
        (status = 404, description = "Conversation not found")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn rate_conversation(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    AppJson(payload): AppJson<CreateRatingRequest>,
) -> Result<impl IntoResponse> {
    let rating = state
        .conversation_service
        .rate_conversation(user.tenant_id, id, payload, user.user_id)
        .await?;

    Ok((StatusCode::CREATED, Json(rating)))
}

/// List ratings for a conversation
#[utoipa::path(
    get,
    path = "/api/conversations/{id}/ratings",
    tag = "ratings",
    params(
        ("id" = Uuid, Path, description = "Conversation ID")
    ),
    responses(
        (status = 200, description = "Ratings", body = Vec<RatingResponse>),
        (status = 404, description = "Conversation not found")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn list_ratings(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<RatingResponse>>> {
    let ratings = state
        .conversation_service
        .list_ratings(user.tenant_id, id)
        .await?;

    Ok(Json(ratings))
}
