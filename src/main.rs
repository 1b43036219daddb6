mod availability;
mod bookings;
mod db;
mod error;
mod gateway;
mod models;
mod notifications;
mod payments;
mod pricing;
mod providers;
mod validation;

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    routing::{get, patch, post},
    Router,
};
use chrono::NaiveDate;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use availability::AvailabilityResolver;
use bookings::{
    BookingResponse, BookingService, BookingStatus, CancelBookingRequest, CreateBookingRequest,
    DepositStatus, PgBookingStore, UpdateBookingStatusRequest,
};
use gateway::{GatewayConfig, RateLimitedGateway, RetryPolicy};
use models::{BusinessCalendarRules, Role, Slot};
use notifications::{
    DispatcherConfig, HttpEmailProvider, HttpSmsProvider, NotificationDispatcher,
    PgNotificationStore, StaticAutoResponder,
};
use payments::{
    EventTypeMetrics, PaymentEventType, PaymentReconciler, PgWebhookEventStore,
    ReconcilerMetricsSummary, WebhookAck, WebhookDisposition, WebhookEvent,
};
use pricing::Quote;
use providers::{HttpCalendarProvider, HttpPaymentProvider};

/// OpenAPI documentation structure
#[derive(OpenApi)]
#[openapi(
    paths(
        bookings::handlers::get_availability_handler,
        bookings::handlers::quote_handler,
        bookings::handlers::create_booking_handler,
        bookings::handlers::get_booking_handler,
        bookings::handlers::cancel_booking_handler,
        bookings::handlers::update_booking_status_handler,
        payments::handlers::payment_webhook_handler,
        payments::handlers::reconciler_metrics_handler,
    ),
    components(
        schemas(
            bookings::handlers::AvailabilityResponse,
            bookings::handlers::QuoteRequest,
            Quote,
            Slot,
            Role,
            BookingStatus,
            DepositStatus,
            CreateBookingRequest,
            CancelBookingRequest,
            UpdateBookingStatusRequest,
            BookingResponse,
            WebhookEvent,
            PaymentEventType,
            WebhookDisposition,
            WebhookAck,
            ReconcilerMetricsSummary,
            EventTypeMetrics,
        )
    ),
    tags(
        (name = "availability", description = "Candidate slot resolution"),
        (name = "pricing", description = "Deterministic price quotes"),
        (name = "bookings", description = "Booking lifecycle management"),
        (name = "webhooks", description = "Payment provider webhook intake"),
        (name = "metrics", description = "Reconciliation counters")
    ),
    info(
        title = "Mobile Notary Booking API",
        version = "1.0.0",
        description = "Availability resolution, pricing, booking reconciliation and notifications \
                       for a mobile notary service",
        contact(
            name = "API Support",
            email = "support@notarybooking.example"
        )
    )
)]
struct ApiDoc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub bookings: Arc<BookingService>,
    pub reconciler: Arc<PaymentReconciler>,
    pub webhook_secret: String,
}

/// Creates and configures the application router
/// Maps all API endpoints to their handlers and adds CORS middleware
fn create_router(state: AppState) -> Router {
    use tower_http::cors::{Any, CorsLayer};

    // Configure CORS to allow all origins, methods, and headers
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Swagger UI
        .merge(
            SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()),
        )
        // API routes
        .route("/api/availability", get(bookings::get_availability_handler))
        .route("/api/pricing/quote", post(bookings::quote_handler))
        .route("/api/bookings", post(bookings::create_booking_handler))
        .route("/api/bookings/:id", get(bookings::get_booking_handler))
        .route(
            "/api/bookings/:id/cancel",
            post(bookings::cancel_booking_handler),
        )
        .route(
            "/api/bookings/:id/status",
            patch(bookings::update_booking_status_handler),
        )
        .route("/webhooks/payment", post(payments::payment_webhook_handler))
        .route(
            "/api/metrics/reconciler",
            get(payments::reconciler_metrics_handler),
        )
        .layer(cors)
        .with_state(state)
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Calendar rules from the environment
///
/// `BLACKOUT_DATES` is a comma-separated list of `YYYY-MM-DD` dates.
fn calendar_rules_from_env() -> BusinessCalendarRules {
    let mut rules = BusinessCalendarRules::default();

    if let Ok(raw) = std::env::var("BLACKOUT_DATES") {
        let dates: HashSet<NaiveDate> = raw
            .split(',')
            .filter_map(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
            .collect();
        rules.blackout_dates = dates;
    }
    if let Ok(raw) = std::env::var("MINIMUM_LEAD_TIME_MINUTES") {
        if let Ok(minutes) = raw.parse() {
            rules.minimum_lead_time_minutes = minutes;
        }
    }
    if let Ok(raw) = std::env::var("BUSINESS_TZ_OFFSET_MINUTES") {
        match raw.parse() {
            Ok(offset) if validation::validate_tz_offset_minutes(offset).is_ok() => {
                rules.business_tz_offset_minutes = offset;
            }
            _ => tracing::warn!("ignoring invalid BUSINESS_TZ_OFFSET_MINUTES: {}", raw),
        }
    }
    rules
}

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    tracing::info!("Notary Booking API - Starting...");

    let database_url =
        std::env::var("DATABASE_URL").expect("DATABASE_URL must be set in environment");
    let webhook_secret =
        std::env::var("WEBHOOK_SECRET").expect("WEBHOOK_SECRET must be set in environment");
    let host = env_or("HOST", "0.0.0.0");
    let port = env_or("PORT", "8080");

    // Create database connection pool
    tracing::info!("Connecting to database...");
    let db_pool = db::create_pool(&database_url)
        .await
        .expect("Failed to create database pool");

    // Run SQLx migrations on startup
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Migrations completed successfully");

    // One HTTP client and one gateway shared by every outbound integration
    let http_client = reqwest::Client::new();
    let outbound_gateway = Arc::new(RateLimitedGateway::new(GatewayConfig::default()));

    let calendar_provider = Arc::new(HttpCalendarProvider::new(
        http_client.clone(),
        env_or("CALENDAR_API_URL", "https://calendar.invalid"),
        env_or("CALENDAR_API_KEY", ""),
    ));
    let payment_provider = Arc::new(HttpPaymentProvider::new(
        http_client.clone(),
        env_or("PAYMENT_API_URL", "https://payments.invalid"),
        env_or("PAYMENT_API_KEY", ""),
    ));

    let calendar_rules = calendar_rules_from_env();
    let buffer_minutes = calendar_rules.buffer_between_appointments_minutes;
    let resolver = Arc::new(AvailabilityResolver::new(
        calendar_provider.clone(),
        Arc::clone(&outbound_gateway),
        calendar_rules,
        env_or("CALENDAR_ID", "primary"),
    ));

    // Notification pipeline: email first, SMS failover, auto-responder last
    let notification_store = Arc::new(PgNotificationStore::new(db_pool.clone()));
    let (notifier, _dispatcher) = NotificationDispatcher::spawn(
        notification_store,
        vec![
            Arc::new(HttpEmailProvider::new(
                http_client.clone(),
                env_or("EMAIL_API_URL", "https://email.invalid"),
                env_or("EMAIL_API_KEY", ""),
            )),
            Arc::new(HttpSmsProvider::new(
                http_client.clone(),
                env_or("SMS_API_URL", "https://sms.invalid"),
                env_or("SMS_API_KEY", ""),
            )),
            Arc::new(StaticAutoResponder::new()),
        ],
        Arc::clone(&outbound_gateway),
        DispatcherConfig::default(),
    );

    let booking_service = Arc::new(BookingService::new(
        Arc::new(PgBookingStore::new(db_pool.clone(), buffer_minutes)),
        resolver,
        models::default_catalog(),
        models::default_promos(),
        calendar_provider,
        payment_provider,
        Arc::clone(&outbound_gateway),
        notifier,
        env_or("CALENDAR_ID", "primary"),
    ));

    let reconciler = Arc::new(PaymentReconciler::new(
        Arc::new(PgWebhookEventStore::new(db_pool)),
        Arc::clone(&booking_service),
        RetryPolicy::default(),
    ));

    let app = create_router(AppState {
        bookings: booking_service,
        reconciler,
        webhook_secret,
    });

    // Start the Axum server
    let addr = format!("{}:{}", host, port);
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Notary Booking API is running on http://{}", addr);
    tracing::info!("Swagger UI available at http://{}/swagger-ui", addr);

    axum::serve(listener, app)
        .await
        .expect("Server error");
}

#[cfg(test)]
mod tests;
