use actix_web::{delete, get, post, web, HttpResponse};
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::middleware::guards::AuthedUser;
use crate::models::{ConversationId, UserId};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatRequest {
    pub target_user_id: Option<UserId>,
}

#[derive(Debug, Deserialize)]
pub struct ListChatsQuery {
    pub offset: Option<i64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

/// Open (or return the existing) conversation with a peer.
/// POST /chat
#[post("/chat")]
pub async fn create_chat(
    state: web::Data<AppState>,
    user: AuthedUser,
    body: web::Json<CreateChatRequest>,
) -> AppResult<HttpResponse> {
    let target = body
        .target_user_id
        .ok_or_else(|| AppError::InvalidOperation("targetUserId is required".into()))?;

    let (conversation, created) = state.store.create_conversation(user.id, target).await?;
    if created {
        state
            .gateway
            .notify_new_chat(target, conversation.id)
            .await?;
    }

    let entry = state.list.entry_for(user.id, conversation.id).await?;
    if created {
        Ok(HttpResponse::Created().json(entry))
    } else {
        Ok(HttpResponse::Ok().json(entry))
    }
}

/// Page of the caller's conversation list.
/// GET /chat?offset&limit&search
#[get("/chat")]
pub async fn list_chats(
    state: web::Data<AppState>,
    user: AuthedUser,
    query: web::Query<ListChatsQuery>,
) -> AppResult<HttpResponse> {
    let limit = state.config.clamp_limit(query.limit);
    let entries = state
        .list
        .list(
            user.id,
            query.offset.unwrap_or(0),
            limit,
            query.search.as_deref(),
        )
        .await?;
    Ok(HttpResponse::Ok().json(entries))
}

/// Delete a conversation and cascade its messages.
/// DELETE /chat/{id}
#[delete("/chat/{id}")]
pub async fn delete_chat(
    state: web::Data<AppState>,
    user: AuthedUser,
    path: web::Path<ConversationId>,
) -> AppResult<HttpResponse> {
    let conversation_id = path.into_inner();
    state
        .store
        .delete_conversation(conversation_id, user.id)
        .await?;
    state.gateway.forget_conversation(conversation_id).await;
    Ok(HttpResponse::NoContent().finish())
}

/// Page of messages, oldest first within the page.
/// GET /chat/{id}/messages?offset&limit
#[get("/chat/{id}/messages")]
pub async fn get_messages(
    state: web::Data<AppState>,
    user: AuthedUser,
    path: web::Path<ConversationId>,
    query: web::Query<MessagesQuery>,
) -> AppResult<HttpResponse> {
    let conversation_id = path.into_inner();
    if !state.store.get(conversation_id).await?.is_participant(user.id) {
        return Err(AppError::Forbidden);
    }

    let limit = state.config.clamp_limit(query.limit);
    let messages = state
        .store
        .list_messages(conversation_id, query.offset.unwrap_or(0), limit)
        .await?;
    Ok(HttpResponse::Ok().json(messages))
}
