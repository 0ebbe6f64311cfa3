pub mod conversation_list;
pub mod gateway;

pub use conversation_list::ConversationListService;
pub use gateway::ChatGateway;
