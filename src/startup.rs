//! Application Startup
//!
//! Wires repositories, caches, the connection registry, and the
//! broadcast backend into the shared state, then builds the server.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use redis::aio::ConnectionManager;
use sqlx::PgPool;
use tokio::net::TcpListener;
use uuid::Uuid;

use crate::application::{MessageBroadcastService, RoomMembershipResolver, SessionResolver};
use crate::config::{BroadcastBackendKind, Settings};
use crate::infrastructure::cache::{PresenceStore, PresenceTracker, RedisMessageCache};
use crate::infrastructure::repositories::{
    PgChannelRepository, PgMemberRepository, PgMessageRepository, PgUserRepository,
};
use crate::infrastructure::{cache, database};
use crate::presentation::http;
use crate::presentation::websocket::{
    run_relay_subscriber, BroadcastBackend, ConnectionRegistry, LocalBroadcast, RedisBroadcast,
    TypingTracker,
};
use crate::shared::snowflake::SnowflakeGenerator;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub redis: ConnectionManager,
    pub settings: Arc<Settings>,
    pub registry: Arc<ConnectionRegistry>,
    pub backend: Arc<dyn BroadcastBackend>,
    pub typing: Arc<TypingTracker>,
    pub presence: Arc<dyn PresenceTracker>,
    pub sessions: SessionResolver,
    pub rooms: RoomMembershipResolver,
    pub messages: Arc<MessageBroadcastService>,
}

/// Application instance
pub struct Application {
    listener: TcpListener,
    router: Router,
}

impl Application {
    /// Build the application from settings
    pub async fn build(settings: Settings) -> Result<Self> {
        let db = database::create_pool(&settings.database).await?;
        tracing::info!("Database connection pool created");

        let redis = cache::create_redis_client(&settings.redis).await?;

        let registry = Arc::new(ConnectionRegistry::new(
            settings.gateway.max_connections_per_address,
        ));

        let backend: Arc<dyn BroadcastBackend> = match settings.gateway.broadcast {
            BroadcastBackendKind::Local => {
                tracing::info!("Using local broadcast backend");
                Arc::new(LocalBroadcast::new(registry.clone()))
            }
            BroadcastBackendKind::Redis => {
                let instance = Uuid::new_v4();
                tracing::info!(%instance, "Using redis broadcast backend");

                // Pub/sub needs its own connection; the manager multiplexes
                // commands and cannot enter subscribe mode.
                let client = redis::Client::open(settings.redis.url.as_str())?;
                tokio::spawn(run_relay_subscriber(
                    client,
                    settings.gateway.event_channel.clone(),
                    registry.clone(),
                    instance,
                ));

                Arc::new(RedisBroadcast::new(
                    registry.clone(),
                    redis.clone(),
                    settings.gateway.event_channel.clone(),
                    instance,
                ))
            }
        };

        let users = Arc::new(PgUserRepository::new(db.clone()));
        let channels = Arc::new(PgChannelRepository::new(db.clone()));
        let members = Arc::new(PgMemberRepository::new(db.clone()));
        let messages_repo = Arc::new(PgMessageRepository::new(db.clone()));

        let message_cache = Arc::new(RedisMessageCache::new(
            redis.clone(),
            settings.gateway.message_cache_ttl_secs,
        ));
        let presence: Arc<dyn PresenceTracker> = Arc::new(PresenceStore::new(
            redis.clone(),
            settings.gateway.presence_ttl_secs,
        ));

        let snowflake = Arc::new(SnowflakeGenerator::new(settings.snowflake.machine_id as u64));

        let typing = Arc::new(TypingTracker::new(
            std::time::Duration::from_secs(settings.gateway.typing_ttl_secs),
            backend.clone(),
        ));
        let sessions = SessionResolver::new(redis.clone(), users.clone());
        let rooms = RoomMembershipResolver::new(members.clone(), channels.clone());
        let messages = Arc::new(MessageBroadcastService::new(
            messages_repo,
            channels,
            members,
            users,
            message_cache,
            backend.clone(),
            snowflake,
            settings.gateway.message_cache_page_size,
        ));

        let state = AppState {
            db,
            redis,
            settings: Arc::new(settings.clone()),
            registry,
            backend,
            typing,
            presence,
            sessions,
            rooms,
            messages,
        };

        let router = http::create_router(state);

        let addr: SocketAddr = settings.server_addr().parse()?;
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Listening on {}", addr);

        Ok(Self { listener, router })
    }

    /// Run the server until stopped
    pub async fn run_until_stopped(self) -> Result<()> {
        // ConnectInfo feeds the admission counter with the peer address
        axum::serve(
            self.listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;
        Ok(())
    }

    /// Get the bound address
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}
