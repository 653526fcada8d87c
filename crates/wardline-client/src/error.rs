//! Error type for engine operations.

use thiserror::Error;

use wardline_shared::RoomId;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Net(#[from] wardline_net::NetError),

    #[error(transparent)]
    Store(#[from] wardline_store::StoreError),

    #[error("room {0} is not in the registry")]
    UnknownRoom(RoomId),

    #[error("send rejected: {0}")]
    SendRejected(String),
}
