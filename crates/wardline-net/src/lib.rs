// Network layer: chat socket connection and the REST API client.

pub mod error;
pub mod registry;
pub mod rest;
pub mod socket;

pub use error::NetError;
pub use registry::{ConnectionHandle, ConnectionRegistry};
pub use rest::ChatApi;
pub use socket::{spawn_socket, SocketCommand, SocketConfig, SocketNotification};
