//! HTTP server implementation
//!
//! hyper http1 with TokioIo, one spawned task per connection; upgrades
//! enabled so the realtime socket can share the listener.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};

use chunk_cache_core::CacheStore;

use crate::ack::AckService;
use crate::agent;
use crate::association::{AssociationRepository, AssociationService};
use crate::auth::AuthService;
use crate::client::ApiClient;
use crate::config::Args;
use crate::db::MongoClient;
use crate::domain::{DomainRepository, DomainService};
use crate::entity::{EntityRepository, EntityService};
use crate::jwt::JwtService;
use crate::key::{KeyRepository, KeyService};
use crate::message::{MessageRepository, MessageService};
use crate::policy::PolicyService;
use crate::profile::ProfileService;
use crate::pubsub::EventHub;
use crate::routes;
use crate::schema::SchemaService;
use crate::semanticid::SemanticIdService;
use crate::store::StoreService;
use crate::subscription::{SubscriptionRepository, SubscriptionService};
use crate::timeline::{TimelineRepository, TimelineService};
use crate::types::Result;

use super::websocket;

const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Shared application state: the three global handles (db, cache, hub)
/// plus every service, built leaves-first.
pub struct AppState {
    pub config: Args,
    pub db: MongoClient,
    pub cache: Arc<CacheStore>,
    pub hub: Arc<EventHub>,
    pub auth: AuthService,
    pub store: StoreService,
    pub entity: EntityService,
    pub domain: DomainService,
    pub key: KeyService,
    pub timeline: TimelineService,
    pub message: MessageService,
    pub association: AssociationService,
    pub profile: ProfileService,
    pub subscription: SubscriptionService,
    pub ack: AckService,
}

impl AppState {
    pub async fn init(config: Args) -> Result<Self> {
        let db = MongoClient::new(&config.db_uri, &config.db_name).await?;
        let cache = Arc::new(CacheStore::new());
        let hub = Arc::new(EventHub::new());
        let client = ApiClient::new(&config.fqdn);

        let schema = SchemaService::new(&db, cache.clone()).await?;
        let jwt = JwtService::new(cache.clone());
        let policy = PolicyService::new(cache.clone());

        let domain = DomainService::new(
            DomainRepository::new(&db).await?,
            client.clone(),
            config.clone(),
        );
        let key = KeyService::new(KeyRepository::new(&db).await?);
        let entity = EntityService::new(
            EntityRepository::new(&db, cache.clone()).await?,
            client.clone(),
            config.clone(),
            key.clone(),
            policy.clone(),
            jwt.clone(),
        );
        let semanticid = SemanticIdService::new(&db).await?;
        let subscription = SubscriptionService::new(
            SubscriptionRepository::new(&db, schema.clone()).await?,
        );

        let timeline = TimelineService::new(
            TimelineRepository::new(
                &db,
                cache.clone(),
                hub.clone(),
                client.clone(),
                schema.clone(),
                config.clone(),
            )
            .await?,
            entity.clone(),
            semanticid.clone(),
            subscription.clone(),
            policy.clone(),
            config.clone(),
        );

        let message = MessageService::new(
            MessageRepository::new(&db, schema.clone(), cache.clone()).await?,
            timeline.clone(),
            policy.clone(),
        );
        let association = AssociationService::new(
            AssociationRepository::new(&db, schema.clone()).await?,
            timeline.clone(),
            message.clone(),
        );
        let profile = ProfileService::new(&db, schema.clone(), semanticid.clone()).await?;
        let ack = AckService::new(&db).await?;

        let store = StoreService::new(
            key.clone(),
            entity.clone(),
            message.clone(),
            association.clone(),
            profile.clone(),
            timeline.clone(),
            ack.clone(),
            subscription.clone(),
        );

        let auth = AuthService::new(config.clone(), entity.clone(), domain.clone(), key.clone())?;

        Ok(Self {
            config,
            db,
            cache,
            hub,
            auth,
            store,
            entity,
            domain,
            key,
            timeline,
            message,
            association,
            profile,
            subscription,
            ack,
        })
    }
}

/// Bind, start the background tasks and serve until the process dies.
pub async fn run(state: Arc<AppState>) -> Result<()> {
    agent::spawn_peer_connector(state.hub.clone(), state.config.clone());

    {
        let cache = state.cache.clone();
        let hub = state.hub.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CACHE_SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                cache.sweep_expired();
                hub.reap_idle();
            }
        });
    }

    let listener = TcpListener::bind(state.config.listen)
        .await
        .map_err(|e| crate::types::ConcrntError::Internal(format!("bind failed: {e}")))?;
    info!("listening on {}", state.config.listen);

    loop {
        let (stream, remote) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("accept failed: {}", e);
                continue;
            }
        };

        let state = state.clone();
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service = service_fn(move |req| {
                let state = state.clone();
                async move { Ok::<_, hyper::Error>(route(state, req).await) }
            });

            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service)
                .with_upgrades()
                .await
            {
                error!(remote = %remote, "connection error: {}", e);
            }
        });
    }
}

async fn route(state: Arc<AppState>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let path = req.uri().path().to_string();
    let method = req.method().clone();

    let Some(rest) = path.strip_prefix("/api/v1/") else {
        return routes::not_found();
    };
    let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();

    match (&method, segments.as_slice()) {
        (&Method::GET, ["health"]) => routes::misc::health(state).await,
        (&Method::GET, ["status"]) => routes::misc::status(state).await,
        (&Method::POST, ["commit"]) => routes::commit::handle_commit(state, req).await,
        (&Method::GET, ["passport"]) => routes::misc::get_passport(state, req).await,

        (&Method::GET, ["socket"]) => websocket::handle_upgrade(state, req).await,

        (&Method::GET, ["domain"]) => routes::misc::get_own_domain(state).await,
        (&Method::GET, ["domain", id]) => routes::misc::get_domain(state, id).await,
        (&Method::GET, ["domains"]) => routes::misc::list_domains(state).await,

        (&Method::GET, ["entity", id]) => {
            routes::entity::get_entity(state, id, req.uri().query().unwrap_or_default()).await
        }
        (&Method::GET, ["entities"]) => routes::entity::list_entities(state).await,

        (&Method::GET, ["timeline", id]) => routes::timeline::get_timeline(state, id).await,
        (&Method::GET, ["timeline", id, "query"]) => {
            routes::timeline::query(state, id, req.uri().query().unwrap_or_default()).await
        }
        (&Method::GET, ["timelines"]) => {
            routes::timeline::get_timelines(state, req.uri().query().unwrap_or_default()).await
        }
        (&Method::GET, ["timelines", "recent"]) => {
            routes::timeline::get_recent(state, req.uri().query().unwrap_or_default()).await
        }
        (&Method::GET, ["timelines", "chunks"]) => {
            routes::timeline::get_chunks(state, req.uri().query().unwrap_or_default()).await
        }
        (&Method::GET, ["chunks", "itrs"]) => {
            routes::timeline::get_chunk_itrs(state, req.uri().query().unwrap_or_default()).await
        }
        (&Method::GET, ["chunks", "bodies"]) => {
            routes::timeline::get_chunk_bodies(state, req.uri().query().unwrap_or_default()).await
        }

        (&Method::GET, ["message", id]) => routes::misc::get_message(state, id).await,
        (&Method::GET, ["message", id, "associations"]) => {
            routes::misc::get_message_associations(state, id).await
        }
        (&Method::GET, ["association", id]) => routes::misc::get_association(state, id).await,
        (&Method::GET, ["profile", id]) => routes::misc::get_profile(state, id).await,
        (&Method::GET, ["profiles"]) => {
            routes::misc::list_profiles(state, req.uri().query().unwrap_or_default()).await
        }
        (&Method::GET, ["subscription", id]) => routes::misc::get_subscription(state, id).await,
        (&Method::GET, ["subscriptions"]) => {
            routes::misc::list_own_subscriptions(state, req).await
        }

        (&Method::GET, ["entity", id, "acker"]) => routes::misc::get_acker(state, id).await,
        (&Method::GET, ["entity", id, "acking"]) => routes::misc::get_acking(state, id).await,

        _ => routes::not_found(),
    }
}
