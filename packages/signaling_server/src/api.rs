use actix_web::{
    HttpResponse, Result,
    error::ErrorNotFound,
    http::header,
    middleware::DefaultHeaders,
    route,
    web::{self, Data, Json},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{AppState, turn::TurnConfig, ws};

/// Headers added to every response so browser clients on any origin can call the API.
#[must_use]
pub fn cors_headers() -> DefaultHeaders {
    DefaultHeaders::new()
        .add((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .add((header::ACCESS_CONTROL_ALLOW_METHODS, "GET, POST, OPTIONS"))
        .add((header::ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type"))
}

#[route("/health", method = "GET")]
pub async fn health_endpoint() -> Result<Json<Value>> {
    log::trace!("Healthy");
    Ok(Json(json!({"healthy": true})))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomResponse {
    pub room_id: String,
}

#[route("/room", method = "POST")]
pub async fn create_room_endpoint(state: Data<AppState>) -> Result<HttpResponse> {
    let room_id = state.registry.create();

    Ok(HttpResponse::Created().json(CreateRoomResponse { room_id }))
}

#[route("/turn-config", method = "GET")]
pub async fn turn_config_endpoint(state: Data<AppState>) -> Result<Json<TurnConfig>> {
    Ok(Json(state.turn.fetch().await))
}

pub async fn preflight_endpoint() -> HttpResponse {
    HttpResponse::NoContent().finish()
}

pub async fn not_found_endpoint() -> Result<HttpResponse> {
    Err(ErrorNotFound("Not found"))
}

/// Register every route of the signaling server.
pub fn bind_services(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/{path:.*}")
            .guard(actix_web::guard::Options())
            .to(preflight_endpoint),
    )
    .service(health_endpoint)
    .service(create_room_endpoint)
    .service(turn_config_endpoint)
    .service(ws::api::room_websocket_endpoint)
    .default_service(web::to(not_found_endpoint));
}
