pub mod conversations;
pub mod messages;
pub mod realtime_auth;

use crate::error::AppError;
use crate::metrics;
use actix_web::{web, HttpResponse};

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

/// Register every route plus extractor configs that render body and query
/// errors as structured 400s
pub fn configure(cfg: &mut web::ServiceConfig) {
    let json_cfg = web::JsonConfig::default()
        .limit(64 * 1024)
        .error_handler(|err, _req| AppError::bad_request(err.to_string()).into());
    let query_cfg = web::QueryConfig::default()
        .error_handler(|err, _req| AppError::bad_request(err.to_string()).into());
    let form_cfg = web::FormConfig::default()
        .error_handler(|err, _req| AppError::bad_request(err.to_string()).into());

    cfg.app_data(json_cfg)
        .app_data(query_cfg)
        .app_data(form_cfg)
        .route("/health", web::get().to(health))
        .route("/metrics", web::get().to(metrics::metrics_handler))
        .service(
            web::scope("/api/v1")
                .service(conversations::create_conversation)
                .service(conversations::list_conversations)
                .service(conversations::get_conversation)
                .service(conversations::mark_read)
                .service(messages::send_message)
                .service(messages::send_file_message)
                .service(messages::list_messages)
                .service(messages::update_message)
                .service(messages::delete_message)
                .service(realtime_auth::authorize_channel),
        );
}
