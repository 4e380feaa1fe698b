pub mod connection;
pub mod handler;
pub mod hub;
pub mod types;

pub use handler::ws_handler;
pub use hub::ChatHub;
