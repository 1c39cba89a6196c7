use crate::services::{ChannelAuthGateway, MessagingService};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub messaging: Arc<MessagingService>,
    pub channel_auth: Arc<ChannelAuthGateway>,
}

impl AppState {
    pub fn new(messaging: MessagingService, channel_auth: ChannelAuthGateway) -> Self {
        Self {
            messaging: Arc::new(messaging),
            channel_auth: Arc::new(channel_auth),
        }
    }
}
