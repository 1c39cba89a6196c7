use crate::{
    error::AppError,
    middleware::{parse_id, User},
    models::{Message, MessageType, PageQuery, DEFAULT_MESSAGE_LIMIT},
    services::FileUpload,
    state::AppState,
};
use actix_multipart::{Field, Multipart};
use actix_web::{delete, get, http::header, post, put, web, HttpResponse};
use bytes::BytesMut;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(rename = "type")]
    pub message_type: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateMessageRequest {
    pub content: Option<String>,
}

#[derive(Serialize)]
pub struct MessageListResponse {
    pub messages: Vec<Message>,
    pub limit: i64,
    pub offset: i64,
}

fn parse_message_type(raw: Option<&str>) -> Result<MessageType, AppError> {
    match raw {
        None => Ok(MessageType::Text),
        Some(raw) => raw.parse().map_err(AppError::BadRequest),
    }
}

/// POST /api/v1/conversations/{id}/messages
#[post("/conversations/{id}/messages")]
pub async fn send_message(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<String>,
    body: web::Json<SendMessageRequest>,
) -> Result<HttpResponse, AppError> {
    let conversation_id = parse_id(&path, "conversation")?;
    let message_type = parse_message_type(body.message_type.as_deref())?;

    let message = state
        .messaging
        .send_message(user.id, conversation_id, message_type, body.content.as_deref())
        .await?;
    Ok(HttpResponse::Created().json(message))
}

/// Upload an attachment and append it as a message
/// POST /api/v1/conversations/{id}/messages/file (multipart: `type`, `file`)
#[post("/conversations/{id}/messages/file")]
pub async fn send_file_message(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<String>,
    mut payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let conversation_id = parse_id(&path, "conversation")?;
    let max_bytes = state.messaging.upload_policy().max_bytes;

    let mut message_type: Option<MessageType> = None;
    let mut upload: Option<FileUpload> = None;

    while let Some(item) = payload.next().await {
        let mut field =
            item.map_err(|e| AppError::bad_request(format!("malformed multipart body: {e}")))?;

        let disposition = field
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .and_then(|v| header::ContentDisposition::from_raw(v).ok());
        let name = disposition
            .as_ref()
            .and_then(|cd| cd.get_name())
            .map(str::to_string);

        match name.as_deref() {
            Some("type") => {
                let raw = read_field(&mut field, 64).await?;
                let raw = String::from_utf8(raw.to_vec())
                    .map_err(|_| AppError::bad_request("type must be UTF-8"))?;
                message_type = Some(parse_message_type(Some(&raw))?);
            }
            Some("file") => {
                let file_name = disposition
                    .as_ref()
                    .and_then(|cd| cd.get_filename())
                    .unwrap_or("file")
                    .to_string();
                let content_type = field
                    .headers()
                    .get(header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = read_field(&mut field, max_bytes).await?;
                upload = Some(FileUpload {
                    file_name,
                    content_type,
                    bytes,
                });
            }
            _ => {
                // Unknown parts are drained and ignored
                while let Some(chunk) = field.next().await {
                    chunk.map_err(|e| AppError::bad_request(format!("malformed multipart body: {e}")))?;
                }
            }
        }
    }

    let message_type =
        message_type.ok_or_else(|| AppError::bad_request("multipart field 'type' is required"))?;
    let upload = upload.ok_or_else(|| AppError::bad_request("multipart field 'file' is required"))?;

    let message = state
        .messaging
        .send_file_message(user.id, conversation_id, message_type, upload)
        .await?;
    Ok(HttpResponse::Created().json(message))
}

/// Buffer one multipart field, failing once it grows past `limit` bytes
async fn read_field(field: &mut Field, limit: usize) -> Result<bytes::Bytes, AppError> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = field.next().await {
        let chunk =
            chunk.map_err(|e| AppError::bad_request(format!("malformed multipart body: {e}")))?;
        if buf.len() + chunk.len() > limit {
            return Err(AppError::bad_request(format!(
                "multipart field exceeds {limit} bytes"
            )));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

/// GET /api/v1/conversations/{id}/messages?limit=&offset=&order=
#[get("/conversations/{id}/messages")]
pub async fn list_messages(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<String>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, AppError> {
    let conversation_id = parse_id(&path, "conversation")?;
    let page = query.pagination(DEFAULT_MESSAGE_LIMIT);

    let messages = state
        .messaging
        .list_messages(user.id, conversation_id, page, query.order())
        .await?;

    Ok(HttpResponse::Ok().json(MessageListResponse {
        messages,
        limit: page.limit,
        offset: page.offset,
    }))
}

/// PUT /api/v1/messages/{id}
#[put("/messages/{id}")]
pub async fn update_message(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<String>,
    body: web::Json<UpdateMessageRequest>,
) -> Result<HttpResponse, AppError> {
    let message_id = parse_id(&path, "message")?;
    let message = state
        .messaging
        .update_message(user.id, message_id, body.content.as_deref())
        .await?;
    Ok(HttpResponse::Ok().json(message))
}

/// DELETE /api/v1/messages/{id}
#[delete("/messages/{id}")]
pub async fn delete_message(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let message_id = parse_id(&path, "message")?;
    state.messaging.delete_message(user.id, message_id).await?;
    Ok(HttpResponse::NoContent().finish())
}
