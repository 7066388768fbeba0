#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use std::sync::Arc;

use actix_web::{App, middleware, web::Data};
use clap::Parser as _;
use peerdrop_signaling_server::{
    AppState,
    api::{bind_services, cors_headers},
    config::Config,
    registry::RoomRegistry,
    storage::MemoryStorage,
};

fn main() -> Result<(), std::io::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::parse();
    let threads = config.max_threads;

    actix_web::rt::System::with_tokio_rt(move || {
        log::debug!("Running with {threads} max blocking threads");
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .max_blocking_threads(threads)
            .build()
            .expect("Failed to build tokio runtime")
    })
    .block_on(async move {
        let registry = RoomRegistry::new(Arc::new(MemoryStorage::default()));

        let state = Data::new(AppState {
            registry: registry.clone(),
            turn: config.turn_credentials(),
            heartbeat: config.heartbeat(),
        });

        let app = move || {
            App::new()
                .app_data(state.clone())
                .wrap(cors_headers())
                .wrap(middleware::Logger::default())
                .configure(bind_services)
        };

        let mut http_server = actix_web::HttpServer::new(app);

        if let Some(workers) = config.actix_workers {
            log::debug!("Running with {workers} Actix workers");
            http_server = http_server.workers(workers);
        }

        log::info!("Listening on {}:{}", config.bind_addr, config.port);

        let resp = http_server
            .bind((config.bind_addr.as_str(), config.port))?
            .run()
            .await;

        log::debug!("Shutting down rooms...");
        registry.shutdown();

        log::debug!("Server shut down");

        resp
    })
}
