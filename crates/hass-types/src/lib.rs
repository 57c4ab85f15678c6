pub mod event;
pub mod mqtt;
pub mod websocket;

pub use event::{EventError, EventSource, RawEvent, TelemetryEvent};
pub use mqtt::MqttEvent;
pub use websocket::{EventContext, WebSocketEvent};
