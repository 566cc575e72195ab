/// Contains the WebSocket `connect` helper, frame payload extraction, and disconnect
/// classification shared by the upstream connector and the gateway stream client.
pub mod websocket;
