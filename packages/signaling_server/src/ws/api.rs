use actix_web::{
    HttpRequest, HttpResponse, Result,
    error::{ErrorForbidden, ErrorInternalServerError, ErrorNotFound, ErrorUpgradeRequired},
    http::header,
    route,
    web::{self, Data},
};
use peerdrop_signaling::id::is_valid_id;

use crate::{AppState, room::JoinError, ws::handler};

fn is_websocket_upgrade(req: &HttpRequest) -> bool {
    req.headers()
        .get(header::UPGRADE)
        .and_then(|x| x.to_str().ok())
        .is_some_and(|x| x.eq_ignore_ascii_case("websocket"))
}

#[route("/room/{room_id}/ws", method = "GET")]
pub async fn room_websocket_endpoint(
    req: HttpRequest,
    stream: web::Payload,
    room_id: web::Path<String>,
    state: Data<AppState>,
) -> Result<HttpResponse> {
    if !is_websocket_upgrade(&req) {
        return Err(ErrorUpgradeRequired("Expected WebSocket upgrade"));
    }

    let room_id = room_id.into_inner();
    if !is_valid_id(&room_id) {
        return Err(ErrorNotFound("Not found"));
    }

    let (res, session, msg_stream) = actix_ws::handle(&req, stream)?;

    let (conn_tx, conn_rx) = flume::unbounded();

    let (room, joined) = match state.registry.join(&room_id, conn_tx).await {
        Ok(x) => x,
        Err(JoinError::RoomFull) => {
            log::debug!("Rejected connection to full room {room_id}");
            return Err(ErrorForbidden("Room full"));
        }
        Err(e) => {
            log::error!("Failed to join room {room_id}: {e:?}");
            return Err(ErrorInternalServerError("Failed to join room"));
        }
    };

    // spawn websocket handler (and don't await it) so that the response is returned immediately
    actix_web::rt::spawn(handler::room_ws(
        room,
        joined,
        session,
        msg_stream,
        conn_rx,
        state.heartbeat,
    ));

    Ok(res)
}
