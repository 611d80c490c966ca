use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use tracing::info;

use xray_backend::classifier::PneumoniaModel;
use xray_backend::config::Config;
use xray_backend::handlers::{self, AppState};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .compact()
        .init();

    let config = Config::from_env()?;

    let model = PneumoniaModel::load(&config.model).context("no model available to serve")?;
    info!("serving with {:?} model", model.model_type());

    let state = web::Data::new(AppState {
        model,
        max_upload_bytes: config.max_upload_bytes,
    });

    let (host, port) = config.bind_addr();
    info!("Server running at http://{}:{}", host, port);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header();

        App::new()
            .wrap(cors)
            .wrap(Logger::default())
            .app_data(state.clone())
            .configure(handlers::configure)
    })
    .bind((host.as_str(), port))?
    .run()
    .await?;

    Ok(())
}
