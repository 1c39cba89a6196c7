#![allow(dead_code)]

use conversation_service::services::{
    ChannelAuthGateway, MemoryBlobStore, MessagingService, RecordingTransport,
    TransportCredentials, UploadPolicy,
};
use conversation_service::store::MemoryStore;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const APP_KEY: &str = "test-app-key";
pub const APP_SECRET: &str = "test-app-secret";
pub const JWT_PRIVATE_KEY: &str = include_str!("../fixtures/jwt_test_private.pem");
pub const JWT_PUBLIC_KEY: &str = include_str!("../fixtures/jwt_test_public.pem");

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub transport: Arc<RecordingTransport>,
    pub messaging: MessagingService,
    pub gateway: ChannelAuthGateway,
}

pub fn harness() -> Harness {
    harness_with_policy(UploadPolicy::new(64 * 1024))
}

pub fn harness_with_policy(policy: UploadPolicy) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(RecordingTransport::new());
    let timeout = Duration::from_secs(2);

    let messaging = MessagingService::new(
        store.clone(),
        store.clone(),
        transport.clone(),
        Arc::new(MemoryBlobStore::new()),
        policy,
        timeout,
    );
    let gateway = ChannelAuthGateway::new(
        store.clone(),
        TransportCredentials::new(APP_KEY, APP_SECRET),
        timeout,
    );

    Harness {
        store,
        transport,
        messaging,
        gateway,
    }
}

impl Harness {
    /// Conversation between `a` and the `others`, created by `a`
    pub async fn conversation(&self, a: Uuid, others: &[Uuid]) -> Uuid {
        self.messaging
            .create_conversation(a, others, None)
            .await
            .expect("create conversation")
            .view
            .conversation
            .id
    }
}

pub fn users<const N: usize>() -> [Uuid; N] {
    std::array::from_fn(|_| Uuid::new_v4())
}
