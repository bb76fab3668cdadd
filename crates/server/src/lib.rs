pub mod error;
pub mod response;
pub mod routes;

use std::sync::Arc;

use db::DBService;
use services::services::{
    event_notifications::{ConnectionGraph, NotificationDispatcher},
    message_writer::MessageWriter,
};

/// Shared state handed to every route handler
#[derive(Clone)]
pub struct AppState {
    pub db: DBService,
    pub writer: Arc<dyn MessageWriter>,
    pub dispatcher: Arc<dyn NotificationDispatcher>,
    pub graph: Arc<dyn ConnectionGraph>,
}
