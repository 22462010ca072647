#![forbid(unsafe_code)]

//! **fabric-cli** – Demo product service driving the fabric end to end.
//!
//! Every command builds a canonical event envelope, runs it through the
//! versioning middleware and the dispatcher, and prints the cache writes
//! and event envelopes the post-op pipeline produced along the way. It
//! exists to exercise the fabric with a real (if tiny) domain service
//! rather than to be one itself.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use clap::{Parser, Subcommand};
use fabric_bus::{EventBus, InMemoryBus};
use fabric_cache::{acquire_lock, MemoryCache};
use fabric_collab::{entity_key, lock_key, CacheInfo, Cache, CollabError, CollabResult, EventEmitter};
use fabric_orchestrate::{DeterministicFlagEvaluator, PostOpConfig, PostOpPipeline, VersioningMiddleware};
use fabric_registry::{ActionHandler, Decoding, TypedActionHandler};
use fabric_runtime::{FabricRuntime, RuntimeConfig};
use fabric_types::{EntityId, EventEnvelope, EventPayload, EventState, EventType, OrchestrationContext};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

const SERVICE: &str = "product";
const SERVICE_VERSION: &str = "1.0.0";

#[derive(Parser)]
#[command(name = "fabric")]
#[command(about = "Demo product service built on the fabric orchestration core")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Principal to act as.
    #[arg(long, default_value = "cli-user")]
    principal: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a product and run the full post-op pipeline.
    CreateProduct {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        msrp: f64,
        #[arg(long)]
        current_price: f64,
    },
    /// Update a product's pricing via the plain success/error entry point.
    UpdateProduct {
        #[arg(long)]
        id: String,
        #[arg(long)]
        msrp: f64,
        #[arg(long)]
        current_price: f64,
    },
    /// Read a product's cached profile.
    GetProduct {
        #[arg(long)]
        id: String,
    },
    /// Listen for every event published on the bus.
    Daemon,
}

#[derive(Debug, Deserialize)]
struct CreateProductRequest {
    id: String,
    name: String,
    msrp: f64,
    current_price: f64,
}

#[derive(Debug, Deserialize)]
struct UpdateProductRequest {
    id: String,
    msrp: f64,
    current_price: f64,
}

/// Republishes every emitted envelope onto the runtime's own bus, so a
/// `Daemon` subscriber observes the same completed/failed events the
/// handler and pipeline produce.
struct BusEmitter(Arc<dyn EventBus>);

#[async_trait]
impl EventEmitter for BusEmitter {
    async fn emit_envelope(&self, envelope: EventEnvelope) -> CollabResult<Uuid> {
        let id = envelope.event_id;
        self.0.publish(&envelope).map_err(|error| CollabError::Backend(error.to_string()))?;
        Ok(id)
    }

    async fn emit_raw(&self, _event_type: EventType, _entity_id: EntityId, _payload_bytes: Vec<u8>) -> CollabResult<Uuid> {
        Ok(Uuid::now_v7())
    }
}

/// Runs the extended post-op pipeline for `create_product` (§4.1's
/// "triggered only when an extended configuration is provided" path):
/// acquire the per-product lock, normalize, write both cache entries,
/// emit a completed/failed envelope.
struct CreateProductHandler {
    cache: Arc<MemoryCache>,
    pipeline: PostOpPipeline,
}

#[async_trait]
impl TypedActionHandler<CreateProductRequest> for CreateProductHandler {
    async fn handle_typed(&self, context: &OrchestrationContext, _envelope: &EventEnvelope, request: CreateProductRequest) {
        let now = Utc::now();
        let entity_id = EntityId::from(request.id.clone());
        let lock = lock_key(SERVICE, "product", &request.id);

        let guard = match acquire_lock(&self.cache, &lock).await {
            Ok(guard) => guard,
            Err(error) => {
                println!("locked: another call is already creating product {:?} ({error})", request.id);
                return;
            }
        };

        let mut metadata = fabric_types::Metadata::new(&context.principal, now);
        *metadata.service_namespace_mut("product") = json!({
            "name": request.name,
            "pricing": {"msrp": request.msrp, "current_price": request.current_price},
        });

        let config = PostOpConfig {
            entity_type: Some("product".to_string()),
            status: Some("created".to_string()),
            message: format!("created {}", request.name),
            cache_info: Some(CacheInfo {
                key: entity_key(SERVICE, "product", &request.id, "profile"),
                ttl: None,
            }),
            ..Default::default()
        };
        let result = json!({"id": request.id, "name": request.name});

        let outcome = self.pipeline.run_success(context, "create_product", &entity_id, &result, &metadata, &config, now).await;
        for error in &outcome.errors {
            warn!(%error, "post-op pipeline step failed");
        }
        drop(guard);

        println!("product {:?} created ({} pipeline step failures)", request.id, outcome.errors.len());
    }
}

/// Runs the plain `Success`/`Error` entry point for `update_product`,
/// demonstrating the simpler path with no extended pipeline configured.
struct UpdateProductHandler {
    cache: Arc<dyn Cache>,
    handler: fabric_orchestrate::OrchestrationHandler,
}

#[async_trait]
impl TypedActionHandler<UpdateProductRequest> for UpdateProductHandler {
    async fn handle_typed(&self, context: &OrchestrationContext, _envelope: &EventEnvelope, request: UpdateProductRequest) {
        let now = Utc::now();
        let entity_id = EntityId::from(request.id.clone());
        let key = entity_key(SERVICE, "product", &request.id, "profile");

        let existing = self.cache.get(&key, "profile").await.ok().flatten();
        let Some(mut profile) = existing else {
            let cause = std::io::Error::new(std::io::ErrorKind::NotFound, format!("product {} not found", request.id));
            let metadata = fabric_types::Metadata::new(&context.principal, now);
            self.handler
                .error(context, "update_product", "NOT_FOUND", "product does not exist", &cause, &metadata, &entity_id, now)
                .await;
            println!("update failed: product {:?} not found", request.id);
            return;
        };

        if let Some(pricing) = profile.get_mut("pricing") {
            *pricing = json!({"msrp": request.msrp, "current_price": request.current_price});
        }

        let metadata = fabric_types::Metadata::new(&context.principal, now);
        let cache_info = CacheInfo { key, ttl: None };
        let success = self
            .handler
            .success(context, "update_product", "OK", "pricing updated", profile, &metadata, &entity_id, Some(&cache_info), now)
            .await;
        println!("product {:?} updated: {}", request.id, success.message);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level)?;

    let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new(1024));
    let cache = Arc::new(MemoryCache::new());
    let emitter: Arc<dyn EventEmitter> = Arc::new(BusEmitter(bus.clone()));

    let config = RuntimeConfig {
        service_name: SERVICE.to_string(),
        service_version: SERVICE_VERSION.to_string(),
        bus_capacity: 1024,
        events_enabled: true,
    };
    let mut runtime = FabricRuntime::with_bus_and_cache(config, bus, cache.clone(), emitter.clone());

    let pipeline = PostOpPipeline::new(SERVICE, 1, runtime.cache(), emitter.clone());
    let create_handler: Arc<dyn ActionHandler> = Arc::new(Decoding::new(CreateProductHandler { cache: cache.clone(), pipeline }));
    let update_handler: Arc<dyn ActionHandler> = Arc::new(Decoding::new(UpdateProductHandler {
        cache: runtime.cache(),
        handler: runtime.handler().clone(),
    }));
    runtime.register_action("create_product", create_handler, None).await;
    runtime.register_action("update_product", update_handler, None).await;

    let middleware = VersioningMiddleware::new(Arc::new(DeterministicFlagEvaluator), "1.0.0", SERVICE_VERSION, "dev");

    match cli.command {
        Commands::CreateProduct { id, name, msrp, current_price } => {
            let (context, _versioning) = middleware.handle(&cli.principal, Uuid::now_v7(), Utc::now()).await?;
            let envelope = request_envelope(&context, "create_product", &id, json!({"id": id, "name": name, "msrp": msrp, "current_price": current_price}));
            let outcome = runtime.dispatch(&context, &envelope).await;
            info!(?outcome, "create_product dispatched");
        }
        Commands::UpdateProduct { id, msrp, current_price } => {
            let (context, _versioning) = middleware.handle(&cli.principal, Uuid::now_v7(), Utc::now()).await?;
            let envelope = request_envelope(&context, "update_product", &id, json!({"id": id, "msrp": msrp, "current_price": current_price}));
            let outcome = runtime.dispatch(&context, &envelope).await;
            info!(?outcome, "update_product dispatched");
        }
        Commands::GetProduct { id } => {
            let key = entity_key(SERVICE, "product", &id, "profile");
            match cache.get(&key, "profile").await.context("cache read failed")? {
                Some(profile) => println!("{}", serde_json::to_string_pretty(&profile)?),
                None => println!("no cached profile for product {:?}", id),
            }
        }
        Commands::Daemon => {
            println!("listening for events (Ctrl+C to stop)");
            let mut rx = runtime.subscribe();
            let ctrl_c = tokio::signal::ctrl_c();
            tokio::pin!(ctrl_c);
            loop {
                tokio::select! {
                    result = rx.recv() => {
                        match result {
                            Ok(envelope) => println!("{} {}", envelope.event_type, envelope.entity_id),
                            Err(error) => {
                                warn!(%error, "bus subscription ended");
                                break;
                            }
                        }
                    }
                    _ = &mut ctrl_c => break,
                }
            }
        }
    }

    Ok(())
}

fn request_envelope(context: &OrchestrationContext, action: &str, entity_id: &str, data: serde_json::Value) -> EventEnvelope {
    let now = Utc::now();
    EventEnvelope::requested(
        EventType::new(SERVICE, action, 1, EventState::Requested),
        EntityId::from(entity_id),
        now,
        fabric_types::Metadata::new(&context.principal, now),
        EventPayload { data },
        context.correlation_id,
    )
}

fn init_tracing(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    tracing_subscriber::registry().with(filter).with(tracing_subscriber::fmt::layer()).init();
    Ok(())
}
