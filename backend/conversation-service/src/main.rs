use actix_middleware::{IdentityProvider, JwtAuthMiddleware, JwtIdentityProvider};
use actix_web::{web, App, HttpServer};
use conversation_service::{
    config::{Config, StoreBackend},
    db,
    error::AppError,
    logging, routes,
    services::{
        BlobStore, ChannelAuthGateway, MemoryBlobStore, MessagingService, NoopTransport,
        RealtimeTransport, RedisTransport, S3BlobStore, TransportCredentials, UploadPolicy,
    },
    state::AppState,
    store::{ConversationStore, MemoryStore, MessageStore, PgStore},
};
use crypto_core::jwt::JwtValidator;
use std::sync::Arc;
use std::time::Duration;

#[actix_web::main]
async fn main() -> Result<(), AppError> {
    logging::init_tracing();
    let cfg = Config::from_env()?;
    tracing::info!(config = ?cfg, "conversation-service starting");

    let validator = JwtValidator::from_rsa_pem(&cfg.jwt_public_key_pem)
        .map_err(|e| AppError::Config(format!("JWT public key: {e}")))?;
    let identity: Arc<dyn IdentityProvider> = Arc::new(JwtIdentityProvider::new(validator));

    let (conversations, messages, blobs): (
        Arc<dyn ConversationStore>,
        Arc<dyn MessageStore>,
        Arc<dyn BlobStore>,
    ) = match cfg.store_backend {
        StoreBackend::Postgres => {
            let database_url = cfg
                .database_url
                .as_deref()
                .ok_or_else(|| AppError::Config("DATABASE_URL missing".into()))?;
            let pool = db::init_pool(database_url)
                .await
                .map_err(|e| AppError::StartServer(format!("db: {e}")))?;
            let store = Arc::new(PgStore::new(pool));
            let blobs = Arc::new(S3BlobStore::from_config(&cfg.s3).await);
            (store.clone(), store, blobs)
        }
        StoreBackend::Memory => {
            tracing::warn!("using in-memory store; data is lost on restart");
            let store = Arc::new(MemoryStore::new());
            (store.clone(), store, Arc::new(MemoryBlobStore::new()))
        }
    };

    let transport: Arc<dyn RealtimeTransport> = match &cfg.redis_url {
        Some(url) => Arc::new(
            RedisTransport::connect(url)
                .await
                .map_err(|e| AppError::StartServer(format!("redis: {e}")))?,
        ),
        None => {
            tracing::warn!("REDIS_URL not set; realtime events are dropped");
            Arc::new(NoopTransport)
        }
    };

    let store_timeout = Duration::from_millis(cfg.store_timeout_ms);
    let messaging = MessagingService::new(
        conversations.clone(),
        messages,
        transport,
        blobs,
        UploadPolicy::new(cfg.upload_max_bytes),
        store_timeout,
    );
    let channel_auth = ChannelAuthGateway::new(
        conversations,
        TransportCredentials::new(&cfg.realtime_app_key, &cfg.realtime_app_secret),
        store_timeout,
    );
    let state = AppState::new(messaging, channel_auth);

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(%bind_addr, "starting conversation-service HTTP server");

    HttpServer::new(move || {
        let cors = actix_cors::Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(JwtAuthMiddleware::new(identity.clone()))
            .wrap(actix_middleware::Logging)
            .wrap(actix_middleware::RequestId::new())
            .wrap(cors)
            .app_data(web::Data::new(state.clone()))
            .configure(routes::configure)
    })
    .bind(&bind_addr)
    .map_err(|e| AppError::StartServer(format!("bind: {e}")))?
    .run()
    .await
    .map_err(|e| AppError::StartServer(format!("server: {e}")))
}
