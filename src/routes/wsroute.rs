use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

use crate::middleware::guards::{verify_token, ws_token};
use crate::state::AppState;
use crate::websocket::session::WsSession;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// WebSocket upgrade endpoint.
///
/// Authentication happens before the upgrade completes: a connection that
/// presents no valid credential is rejected here and never reaches the
/// session actor, so an unauthenticated socket cannot linger.
#[get("/ws")]
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    query: web::Query<WsParams>,
) -> Result<HttpResponse, Error> {
    let token = match ws_token(&req, query.token.as_deref()) {
        Some(token) => token,
        None => {
            warn!("websocket rejected: no credential presented");
            return Ok(HttpResponse::Unauthorized().finish());
        }
    };

    let user_id = match verify_token(&state.config.jwt_secret, &token) {
        Ok(id) => id,
        Err(_) => {
            warn!("websocket rejected: invalid credential");
            return Ok(HttpResponse::Unauthorized().finish());
        }
    };

    // Register with the gateway while still in async context; the actor
    // only drains the outbound channel and feeds inbound events.
    let (session_id, rx) = state.gateway.connect(user_id).await;
    let session = WsSession::new(
        user_id,
        session_id,
        state.gateway.clone(),
        rx,
        Duration::from_secs(state.config.client_timeout_secs),
    );

    // A failed handshake means the actor never starts and its teardown
    // never runs, so the registration must be unwound here.
    match ws::start(session, &req, stream) {
        Ok(response) => Ok(response),
        Err(e) => {
            warn!(user_id, "websocket handshake failed, unwinding session");
            state.gateway.disconnect(user_id, session_id).await;
            Err(e)
        }
    }
}
