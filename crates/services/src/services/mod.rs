pub mod event_notifications;
pub mod message_writer;
pub mod tree_growth;
