pub mod rest;
pub mod websocket;
pub mod websocket_stream;


pub use rest::{router, AppState, RestApi};
