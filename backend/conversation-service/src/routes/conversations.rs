use crate::{
    error::AppError,
    middleware::{parse_id, User},
    models::{ConversationView, PageQuery, DEFAULT_CONVERSATION_LIMIT},
    state::AppState,
};
use actix_web::{get, post, web, HttpResponse};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    #[serde(default)]
    pub participant_ids: Vec<String>,
    pub initial_message: Option<String>,
}

#[derive(Serialize)]
pub struct ConversationListResponse {
    pub conversations: Vec<ConversationView>,
    pub limit: i64,
    pub offset: i64,
}

/// Create a conversation, or return the existing one with the same participants
/// POST /api/v1/conversations
#[post("/conversations")]
pub async fn create_conversation(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<CreateConversationRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let participant_ids = body
        .participant_ids
        .iter()
        .map(|raw| parse_id(raw, "participant"))
        .collect::<Result<Vec<_>, _>>()?;

    let outcome = state
        .messaging
        .create_conversation(user.id, &participant_ids, body.initial_message.as_deref())
        .await?;

    if outcome.created {
        Ok(HttpResponse::Created().json(outcome.view))
    } else {
        Ok(HttpResponse::Ok().json(outcome.view))
    }
}

/// GET /api/v1/conversations?limit=&offset=
#[get("/conversations")]
pub async fn list_conversations(
    state: web::Data<AppState>,
    user: User,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, AppError> {
    let page = query.pagination(DEFAULT_CONVERSATION_LIMIT);
    let conversations = state.messaging.list_conversations(user.id, page).await?;

    Ok(HttpResponse::Ok().json(ConversationListResponse {
        conversations,
        limit: page.limit,
        offset: page.offset,
    }))
}

/// GET /api/v1/conversations/{id}
#[get("/conversations/{id}")]
pub async fn get_conversation(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let conversation_id = parse_id(&path, "conversation")?;
    let view = state
        .messaging
        .find_conversation(user.id, conversation_id)
        .await?;
    Ok(HttpResponse::Ok().json(view))
}

/// Move the caller's read mark to now
/// POST /api/v1/conversations/{id}/read
#[post("/conversations/{id}/read")]
pub async fn mark_read(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let conversation_id = parse_id(&path, "conversation")?;
    let view = state.messaging.mark_read(user.id, conversation_id).await?;
    Ok(HttpResponse::Ok().json(view))
}
