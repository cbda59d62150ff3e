// Sentinela pipeline service
//
// Wires the triage motor, notification channels and HTTP surface together:
// Postgres for the stores, Redis for the stream/queues/pub-sub, axum for
// the SSE dashboard endpoint and the status surface.

mod events;
mod status;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sentinela_core::{
    DeliveryQueue, EventStream, HospitalDirectory, NotificationLog, ObitoStore, OccurrenceSink,
    OccurrenceStore, Publisher, RecipientDirectory, RuleSource, Settings, Subscriber,
};
use sentinela_notify::{
    EmailSender, NotificationFanout, PushGateway, QueueWorker, SmsSender, SseHub,
};
use sentinela_storage::memory::InMemoryRecipientDirectory;
use sentinela_storage::{Database, RedisBroker};
use sentinela_triage::{RuleCache, TriageMotor, TriageStats};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sentinela=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("sentinela starting...");
    let settings = Settings::from_env();

    let database_url = settings
        .database_url
        .clone()
        .context("DATABASE_URL environment variable required")?;
    let db = Arc::new(
        Database::from_url(&database_url)
            .await
            .context("failed to connect to database")?,
    );
    tracing::info!("connected to database");

    let broker = Arc::new(
        RedisBroker::connect(&settings.redis_url)
            .await
            .context("failed to connect to redis")?,
    );
    tracing::info!("connected to redis");

    // Dashboard channel
    let hub = Arc::new(SseHub::new(
        broker.clone() as Arc<dyn Publisher>,
        broker.clone() as Arc<dyn Subscriber>,
        db.clone() as Arc<dyn NotificationLog>,
    ));
    hub.start().await;

    // Static recipient lists until role-based routing lands
    let recipients = Arc::new(InMemoryRecipientDirectory::new(
        settings.recipients.emails.clone(),
        settings.recipients.phones.clone(),
        settings.recipients.push_tokens.clone(),
    ));

    // Email channel (disabled without SMTP credentials)
    let mut email_worker = None;
    let mut email_queue: Option<Arc<dyn DeliveryQueue>> = None;
    if let Some(smtp) = &settings.smtp {
        let sender = EmailSender::new(smtp).context("invalid smtp configuration")?;
        let queue: Arc<dyn DeliveryQueue> = Arc::new(broker.queue("email_queue"));
        let worker = Arc::new(QueueWorker::new(
            queue.clone(),
            Arc::new(sender),
            db.clone() as Arc<dyn NotificationLog>,
            settings.worker.clone(),
        ));
        worker.start().await;
        email_queue = Some(queue);
        email_worker = Some(worker);
    } else {
        tracing::info!("smtp not configured, email channel disabled");
    }

    // SMS channel (disabled without Twilio credentials)
    let mut sms_worker = None;
    let mut sms_queue: Option<Arc<dyn DeliveryQueue>> = None;
    if let Some(twilio) = &settings.twilio {
        let sender = SmsSender::new(twilio.clone()).context("invalid twilio configuration")?;
        let queue: Arc<dyn DeliveryQueue> = Arc::new(broker.queue("sms_queue"));
        let worker = Arc::new(QueueWorker::new(
            queue.clone(),
            Arc::new(sender),
            db.clone() as Arc<dyn NotificationLog>,
            settings.worker.clone(),
        ));
        worker.start().await;
        sms_queue = Some(queue);
        sms_worker = Some(worker);
    } else {
        tracing::info!("twilio not configured, sms channel disabled");
    }

    // Push channel (disabled without an FCM key)
    let push = match &settings.fcm {
        Some(fcm) => Some(Arc::new(
            PushGateway::new(fcm.clone()).context("invalid fcm configuration")?,
        )),
        None => {
            tracing::info!("fcm not configured, push channel disabled");
            None
        }
    };

    let fanout = Arc::new(NotificationFanout::new(
        hub.clone(),
        email_queue,
        sms_queue,
        push,
        recipients as Arc<dyn RecipientDirectory>,
        db.clone() as Arc<dyn NotificationLog>,
        settings.dashboard_url.clone(),
    ));

    // Triage motor
    let rules = Arc::new(RuleCache::new(
        db.clone() as Arc<dyn RuleSource>,
        settings.triage.rules_cache_ttl,
    ));
    let triage_stats = Arc::new(TriageStats::new());
    let motor = Arc::new(TriageMotor::new(
        broker.clone() as Arc<dyn EventStream>,
        db.clone() as Arc<dyn ObitoStore>,
        db.clone() as Arc<dyn OccurrenceStore>,
        db.clone() as Arc<dyn HospitalDirectory>,
        rules,
        fanout as Arc<dyn OccurrenceSink>,
        triage_stats.clone(),
        settings.triage.clone(),
    ));
    motor.start().await;

    // HTTP surface
    let app = Router::new()
        .merge(events::routes(events::AppState { hub: hub.clone() }))
        .merge(status::routes(status::AppState {
            triage_stats,
            hub: hub.clone(),
            email_worker: email_worker.clone(),
            sms_worker: sms_worker.clone(),
        }))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&settings.http_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.http_addr))?;
    tracing::info!(addr = %settings.http_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // Drain in dependency order: stop producing, then delivering, then the hub
    tracing::info!("shutting down...");
    motor.stop().await;
    if let Some(worker) = &email_worker {
        worker.stop().await;
    }
    if let Some(worker) = &sms_worker {
        worker.stop().await;
    }
    hub.stop().await;
    tracing::info!("shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "failed to listen for shutdown signal");
    }
}
