pub mod api;
pub mod handler;

/// Connection ID.
pub type ConnId = usize;

/// Serialized frame queued for a connection.
pub type Msg = String;
