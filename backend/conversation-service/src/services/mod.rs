pub mod blob_store;
pub mod channel_auth;
pub mod messaging_service;
pub mod realtime;

use std::future::Future;
use std::time::Duration;

use crate::metrics;
use crate::store::{StoreError, StoreResult};

pub use blob_store::{BlobStore, FileUpload, MemoryBlobStore, S3BlobStore, UploadPolicy};
pub use channel_auth::{ChannelAuthGateway, ChannelAuthorization};
pub use messaging_service::{CreateConversationOutcome, MessagingService};
pub use realtime::{NoopTransport, RealtimeTransport, RecordingTransport, RedisTransport, TransportCredentials};

/// Run one store call under `timeout`; expiry becomes `StoreError::Timeout`
pub(crate) async fn bounded<T, F>(timeout: Duration, call: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => {
            metrics::record_store_timeout();
            tracing::warn!(timeout_ms = timeout.as_millis() as u64, "store call timed out");
            Err(StoreError::Timeout)
        }
    }
}
