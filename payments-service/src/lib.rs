pub mod config;
pub mod gateways;
pub mod handlers;
pub mod models;
pub mod services;
pub mod utils;

use axum::middleware::from_fn;
use axum::{
    routing::{get, post},
    Router,
};
use secrecy::ExposeSecret;
use service_core::middleware::{metrics::metrics_middleware, tracing::request_id_middleware};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use config::Config;
use gateways::GatewayRegistry;
use services::{BusinessProfile, Database};

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Config,
    pub registry: Arc<GatewayRegistry>,
    pub business: BusinessProfile,
}

pub struct Application {
    port: u16,
    router: Router,
}

impl Application {
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        let db = Database::new(
            config.database.url.expose_secret(),
            config.database.max_connections,
            config.database.min_connections,
        )
        .await?;
        db.run_migrations().await?;

        services::metrics::init_http_metrics();

        let registry = Arc::new(GatewayRegistry::with_builtin());
        let business = BusinessProfile {
            name: config.business.name.clone(),
            address: config.business.address.clone(),
            tax_id: config.business.tax_id.clone(),
            email: config.business.email.clone(),
            phone: config.business.phone.clone(),
        };

        let state = AppState {
            db,
            config: config.clone(),
            registry,
            business,
        };

        let router = Router::new()
            .route("/health", get(handlers::health_check))
            .route("/ready", get(handlers::readiness_check))
            .route("/metrics", get(handlers::metrics))
            // Gateway configuration
            .route(
                "/settings/gateways",
                get(handlers::settings::list_settings).post(handlers::settings::upsert_settings),
            )
            // Deals
            .route("/deals", post(handlers::deals::create_deal))
            .route("/deals/:id", get(handlers::deals::get_deal))
            // Charges and refunds
            .route("/charges", post(handlers::charges::create_charge))
            .route("/refunds", post(handlers::charges::create_refund))
            // Payment plans
            .route("/plans", post(handlers::plans::create_plan))
            .route(
                "/plans/:id",
                get(handlers::plans::get_plan).delete(handlers::plans::delete_plan),
            )
            .route(
                "/plans/:id/installments",
                post(handlers::plans::record_installment),
            )
            .route("/plans/:id/pause", post(handlers::plans::pause_plan))
            .route("/plans/:id/resume", post(handlers::plans::resume_plan))
            .route("/plans/:id/cancel", post(handlers::plans::cancel_plan))
            // Recurring payments
            .route(
                "/subscriptions",
                post(handlers::subscriptions::create_subscription),
            )
            .route(
                "/subscriptions/:id",
                get(handlers::subscriptions::get_subscription),
            )
            .route(
                "/subscriptions/:id/charge",
                post(handlers::subscriptions::charge_subscription),
            )
            .route(
                "/subscriptions/:id/pause",
                post(handlers::subscriptions::pause_subscription),
            )
            .route(
                "/subscriptions/:id/resume",
                post(handlers::subscriptions::resume_subscription),
            )
            .route(
                "/subscriptions/:id/cancel",
                post(handlers::subscriptions::cancel_subscription),
            )
            .route("/reports/mrr", get(handlers::subscriptions::mrr_report))
            // Invoices
            .route("/invoices", post(handlers::invoices::create_invoice))
            .route("/invoices/:id", get(handlers::invoices::get_invoice))
            .route(
                "/invoices/:id/html",
                get(handlers::invoices::get_invoice_html),
            )
            // Gateway callbacks
            .route(
                "/webhooks/:gateway",
                post(handlers::webhooks::receive_webhook),
            )
            .layer(from_fn(metrics_middleware))
            .layer(from_fn(request_id_middleware))
            .layer(
                TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                    let request_id = request
                        .headers()
                        .get("x-request-id")
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or("-");

                    tracing::info_span!(
                        "http_request",
                        request_id = %request_id,
                        method = %request.method(),
                        uri = %request.uri(),
                        version = ?request.version(),
                    )
                }),
            )
            .with_state(state);

        Ok(Self {
            port: config.server.port,
            router,
        })
    }

    pub async fn run_until_stopped(self) -> anyhow::Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        tracing::info!("Listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, self.router).await?;

        Ok(())
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}
