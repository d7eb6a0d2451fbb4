/// Contains WebSocket type aliases and connect/parse helpers.
pub mod websocket;
