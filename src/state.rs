use std::sync::Arc;

use crate::{
    config::Config,
    presence::PresenceRegistry,
    services::{ChatGateway, ConversationListService},
    store::ChatStore,
    users::UserDirectory,
    websocket::ConnectionRegistry,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<ChatStore>,
    pub presence: PresenceRegistry,
    pub users: Arc<dyn UserDirectory>,
    pub list: ConversationListService,
    pub gateway: Arc<ChatGateway>,
}

impl AppState {
    pub fn new(config: Arc<Config>, users: Arc<dyn UserDirectory>) -> Self {
        let store = Arc::new(ChatStore::new(users.clone(), config.max_message_length));
        let presence = PresenceRegistry::new();
        let registry = ConnectionRegistry::new();
        let list = ConversationListService::new(store.clone(), presence.clone(), users.clone());
        let gateway = Arc::new(ChatGateway::new(
            store.clone(),
            presence.clone(),
            registry,
            list.clone(),
        ));

        Self {
            config,
            store,
            presence,
            users,
            list,
            gateway,
        }
    }
}
