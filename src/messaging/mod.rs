pub mod client_address;
pub mod codec;
pub mod dispatch;
pub mod message;
pub mod registry;
pub mod system_messages;
