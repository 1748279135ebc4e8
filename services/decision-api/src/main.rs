use std::time::Duration;

use actix_cors::Cors;
use actix_web::middleware::{from_fn, Logger};
use actix_web::{http::header, web, App, HttpServer};
use decision_api::middleware::{rate_limit, request_id, shrink, REQUEST_ID_HEADER};
use decision_api::routes;
use decision_api::session::{ContextStore, ANON_HEADER, CONTEXT_HEADER};
use decision_api::state::AppState;
use shared::config::Settings;
use tracing::{info, warn};

const MAX_PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let settings = Settings::new()?;
    if settings.openai_api_key.trim().is_empty() {
        warn!("OPENAI_API_KEY not set; generation calls will fail");
    }
    let (state, contexts) = AppState::from_settings(&settings)?;

    if state.limiter.is_none() {
        warn!("RATE_LIMIT_PER_MINUTE is 0; rate limiting disabled");
    }

    let purge_every = settings.context_ttl().min(MAX_PURGE_INTERVAL).max(Duration::from_secs(1));
    let limiter = state.limiter.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(purge_every);
        loop {
            tick.tick().await;
            contexts.purge_expired();
            if let Some(limiter) = &limiter {
                shrink(limiter);
            }
        }
    });

    let origins: Vec<String> = settings
        .cors_origin
        .as_deref()
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(str::to_string)
        .collect();
    if origins.is_empty() {
        warn!("CORS_ORIGIN not set; allowing any origin");
    }

    let bind_addr = format!("{}:{}", settings.http_bind, settings.http_port);
    info!(%bind_addr, model = %settings.openai_model, "starting server");

    HttpServer::new(move || {
        let mut cors = Cors::default()
            .allowed_methods(vec!["GET", "POST", "OPTIONS"])
            .allowed_headers(vec![
                header::CONTENT_TYPE,
                header::AUTHORIZATION,
                header::HeaderName::from_static(CONTEXT_HEADER),
                header::HeaderName::from_static(ANON_HEADER),
                header::HeaderName::from_static(REQUEST_ID_HEADER),
            ])
            .expose_headers(vec![header::HeaderName::from_static(REQUEST_ID_HEADER)])
            .max_age(3600);
        if origins.is_empty() {
            cors = cors.allow_any_origin();
        } else {
            for origin in &origins {
                cors = cors.allowed_origin(origin);
            }
            cors = cors.supports_credentials();
        }

        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(from_fn(rate_limit))
            .wrap(from_fn(request_id))
            .wrap(Logger::new(r#"%a "%r" %s %b %T %{x-request-id}o"#))
            .wrap(cors)
            .configure(routes::configure)
    })
    .bind(bind_addr)?
    .run()
    .await?;
    Ok(())
}
