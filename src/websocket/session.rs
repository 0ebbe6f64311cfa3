//! Per-connection WebSocket actor.
//!
//! One `WsSession` is created when a connection upgrades and torn down
//! when it closes; there is no ambient global listener state. The actor is
//! a thin transport adapter: it drains the gateway's outbound channel into
//! the socket and feeds parsed inbound events back into the gateway.

use std::sync::Arc;
use std::time::{Duration, Instant};

use actix::{Actor, ActorContext, AsyncContext, Handler, Message as ActixMessage, StreamHandler};
use actix_web_actors::ws;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::models::UserId;
use crate::services::ChatGateway;
use crate::websocket::events::{ClientEvent, ServerEvent};
use crate::websocket::SessionId;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Outbound payload for this connection's socket.
#[derive(ActixMessage)]
#[rtype(result = "()")]
struct Outbound(String);

pub struct WsSession {
    user_id: UserId,
    session_id: SessionId,
    gateway: Arc<ChatGateway>,
    /// Taken in `started` by the channel-draining task.
    outbound_rx: Option<UnboundedReceiver<String>>,
    hb: Instant,
    client_timeout: Duration,
}

impl WsSession {
    pub fn new(
        user_id: UserId,
        session_id: SessionId,
        gateway: Arc<ChatGateway>,
        outbound_rx: UnboundedReceiver<String>,
        client_timeout: Duration,
    ) -> Self {
        Self {
            user_id,
            session_id,
            gateway,
            outbound_rx: Some(outbound_rx),
            hb: Instant::now(),
            client_timeout,
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let timeout = self.client_timeout;
        ctx.run_interval(HEARTBEAT_INTERVAL, move |act, ctx| {
            if Instant::now().duration_since(act.hb) > timeout {
                tracing::warn!(user_id = act.user_id, "websocket heartbeat failed, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn handle_event(&self, evt: ClientEvent, ctx: &mut ws::WebsocketContext<Self>) {
        let gateway = self.gateway.clone();
        let user_id = self.user_id;
        let session_id = self.session_id;
        let addr = ctx.address();

        actix::spawn(async move {
            let result = match evt {
                ClientEvent::JoinChat { conversation_id } => {
                    gateway.join(user_id, session_id, conversation_id).await
                }
                ClientEvent::LeaveChat { conversation_id } => {
                    gateway.leave(session_id, conversation_id).await;
                    Ok(())
                }
                ClientEvent::SendMessage {
                    conversation_id,
                    text,
                } => gateway
                    .send_message(user_id, conversation_id, &text)
                    .await
                    .map(|_| ()),
                ClientEvent::MarkAsRead {
                    conversation_id,
                    message_ids,
                } => gateway
                    .mark_as_read(user_id, conversation_id, &message_ids)
                    .await
                    .map(|_| ()),
                ClientEvent::Typing {
                    conversation_id,
                    is_typing,
                } => {
                    gateway.typing(user_id, conversation_id, is_typing).await;
                    Ok(())
                }
            };

            // Failures are reported to the originating connection only and
            // never terminate it.
            if let Err(e) = result {
                addr.do_send(Outbound(
                    ServerEvent::Error {
                        message: e.to_string(),
                    }
                    .to_json(),
                ));
            }
        });
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(user_id = self.user_id, "websocket session started");
        self.hb(ctx);

        // Bridge the gateway's outbound channel into the socket. The task
        // ends on its own once the session unregisters and the sender side
        // is dropped.
        if let Some(mut rx) = self.outbound_rx.take() {
            let addr = ctx.address();
            actix::spawn(async move {
                while let Some(payload) = rx.recv().await {
                    addr.do_send(Outbound(payload));
                }
            });
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!(user_id = self.user_id, "websocket session stopped");
        let gateway = self.gateway.clone();
        let user_id = self.user_id;
        let session_id = self.session_id;
        actix::spawn(async move {
            gateway.disconnect(user_id, session_id).await;
        });
    }
}

impl Handler<Outbound> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: Outbound, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(evt) => self.handle_event(evt, ctx),
                Err(e) => {
                    tracing::warn!(user_id = self.user_id, error = %e, "malformed client event");
                    ctx.text(
                        ServerEvent::Error {
                            message: format!("malformed payload: {e}"),
                        }
                        .to_json(),
                    );
                }
            },
            Ok(ws::Message::Binary(_)) => {
                ctx.text(
                    ServerEvent::Error {
                        message: "binary frames are not supported".into(),
                    }
                    .to_json(),
                );
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::debug!(user_id = self.user_id, ?reason, "websocket close received");
                ctx.stop();
            }
            _ => {}
        }
    }
}
