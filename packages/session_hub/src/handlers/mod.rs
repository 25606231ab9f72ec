pub mod health;
pub mod sandbox;
pub mod session;

// Re-export all handlers for easy route registration
pub use health::{health_handler, health_live_handler, health_ready_handler, metrics_handler};
pub use sandbox::{drop_handler, inbound_handler, scan_handler};
pub use session::{
    check_connection_handler, connect_handler, contacts_handler, disconnect_handler,
    qr_code_handler, send_media_handler, send_message_handler, status_handler,
};
