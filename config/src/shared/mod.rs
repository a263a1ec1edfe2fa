mod base;
mod connection;
mod snapshot;
mod snapshotter;

pub use base::*;
pub use connection::*;
pub use snapshot::*;
pub use snapshotter::*;
