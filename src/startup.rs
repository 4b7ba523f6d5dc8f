use std::net::TcpListener;
use std::sync::Arc;

use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Pool, Postgres};
use tokio::sync::broadcast::error::RecvError;
use tracing_actix_web::TracingLogger;

use crate::config::{DatabaseSettings, Settings};
use crate::email_client::EmailClient;
use crate::queue::{DigestQueue, InProcessQueue, QueueEvent, RedisQueue};
use crate::routes::{
    handle_random_quote, handle_signup, handle_submit_quote, handle_trigger_digest,
    handle_unsubscribe, health_check,
};
use crate::scheduler::{parse_digest_cron, DigestScheduler};
use crate::selector::QuoteSelector;
use crate::storage::PgQuoteStorage;
use crate::worker::DigestWorker;

pub struct Application {
    pub port: u16,
    pub server: Server,
}

impl Application {
    pub async fn build(config: Settings) -> Result<Self, std::io::Error> {
        let db_pool = get_connection_db_pool(&config.database);
        let sender_email = config
            .get_email_client_sender()
            .expect("Sender email is not valid");
        let email_client = EmailClient::new(
            config.get_email_client_base_url(),
            sender_email,
            config.get_email_client_api(),
            None,
        );

        // The only place the backend flag is looked at. Everything downstream
        // holds the trait object and cannot tell the variants apart.
        let queue: Arc<dyn DigestQueue> = if config.digest.durable_queue_enabled {
            let client = redis::Client::open(config.get_broker_address())
                .expect("Broker address is not valid");
            Arc::new(RedisQueue::new(client))
        } else {
            tracing::warn!("Durable queue disabled: digest jobs will not survive a restart");
            Arc::new(InProcessQueue::new())
        };

        spawn_queue_event_logger(queue.as_ref());

        let worker = DigestWorker::new(
            QuoteSelector::new(
                PgQuoteStorage::new(db_pool.clone()),
                config.digest.scan_batch_size,
            ),
            email_client,
        );
        queue
            .process(1, Arc::new(worker))
            .expect("Failed to register the digest worker");

        let schedule =
            parse_digest_cron(&config.digest.cron).expect("Digest cron expression is not valid");
        let scheduler = web::Data::new(DigestScheduler::new(
            db_pool.clone(),
            queue.clone(),
            schedule,
            config.digest.subject_template.clone(),
        ));

        let weekly_trigger = scheduler.clone();
        tokio::spawn(async move { weekly_trigger.run().await });

        let selector = QuoteSelector::new(
            PgQuoteStorage::new(db_pool.clone()),
            config.digest.scan_batch_size,
        );

        let listener =
            TcpListener::bind(config.get_address()).expect("Failed to bind the address.");
        let port = listener.local_addr().unwrap().port();
        let server = run(listener, db_pool, selector, scheduler)?;

        Ok(Self { port, server })
    }

    pub fn get_port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stop(self) -> Result<(), std::io::Error> {
        self.server.await
    }
}

pub fn run(
    listener: TcpListener,
    db_pool: PgPool,
    selector: QuoteSelector<PgQuoteStorage>,
    scheduler: web::Data<DigestScheduler>,
) -> Result<Server, std::io::Error> {
    let db_pool = web::Data::new(db_pool);
    let selector = web::Data::new(selector);

    let server = HttpServer::new(move || {
        // App is where your application logic lives: routing, middlewares, request handler, etc
        App::new()
            // 'wrap' method adds a middleware to the App. This specific middleware provide incoming
            // request logger
            .wrap(TracingLogger::default())
            .route("/health_check", web::get().to(health_check))
            .route("/signup", web::post().to(handle_signup))
            .route("/unsubscribe", web::post().to(handle_unsubscribe))
            .route("/submit", web::post().to(handle_submit_quote))
            .route("/quotes/random", web::get().to(handle_random_quote))
            .route("/digests", web::post().to(handle_trigger_digest))
            .app_data(db_pool.clone())
            .app_data(selector.clone())
            .app_data(scheduler.clone())
    })
    .listen(listener)?
    .run();

    Ok(server)
}

pub fn get_connection_db_pool(config: &DatabaseSettings) -> Pool<Postgres> {
    PgPoolOptions::new()
        .acquire_timeout(std::time::Duration::from_secs(2))
        .connect_lazy_with(config.get_db_options())
}

/// Drains queue events into the log so every settled job leaves a trace,
/// whichever backend produced it.
pub fn spawn_queue_event_logger(queue: &dyn DigestQueue) {
    let mut events = queue.subscribe();

    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(QueueEvent::Completed { job_id }) => {
                    tracing::info!(%job_id, "Digest job completed");
                }
                Ok(QueueEvent::Failed { job_id, error }) => {
                    tracing::error!(%job_id, %error, "Digest job failed");
                }
                Ok(QueueEvent::QueueError { message }) => {
                    tracing::error!(%message, "Job queue reported an error");
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Queue event logger fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}
