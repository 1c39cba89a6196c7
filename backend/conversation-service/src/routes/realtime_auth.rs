use crate::{error::AppError, middleware::User, state::AppState};
use actix_web::{post, web, HttpResponse};
use serde::Deserialize;

/// `socket_id` and `channel_name`, from a form body or the query string
#[derive(Debug, Default, Deserialize)]
pub struct ChannelAuthParams {
    pub socket_id: Option<String>,
    pub channel_name: Option<String>,
}

impl ChannelAuthParams {
    fn or(self, other: ChannelAuthParams) -> ChannelAuthParams {
        ChannelAuthParams {
            socket_id: self.socket_id.or(other.socket_id),
            channel_name: self.channel_name.or(other.channel_name),
        }
    }
}

/// Authorize a subscription to a private real-time channel
/// POST /api/v1/realtime/auth
#[post("/realtime/auth")]
pub async fn authorize_channel(
    state: web::Data<AppState>,
    user: Option<User>,
    form: Option<web::Form<ChannelAuthParams>>,
    query: Option<web::Query<ChannelAuthParams>>,
) -> Result<HttpResponse, AppError> {
    let params = form
        .map(web::Form::into_inner)
        .unwrap_or_default()
        .or(query.map(web::Query::into_inner).unwrap_or_default());

    let socket_id = params.socket_id.unwrap_or_default();
    let channel_name = params.channel_name.unwrap_or_default();

    let authorization = state
        .channel_auth
        .authorize(user.map(|u| u.id), &socket_id, &channel_name)
        .await?;
    Ok(HttpResponse::Ok().json(authorization))
}
