use actix_web::web;

pub mod chat;
pub mod wsroute;

/// Register the REST surface and the WebSocket upgrade endpoint. Shared by
/// `main` and the integration tests so both serve the identical app.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(chat::create_chat)
        .service(chat::list_chats)
        .service(chat::delete_chat)
        .service(chat::get_messages)
        .service(wsroute::ws_handler)
        .route("/health", web::get().to(|| async { "OK" }));
}
