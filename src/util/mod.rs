pub mod buf;
pub mod cancellation;
pub mod countdown_latch;
pub mod message_queue;
