mod message;
pub use message::*;

mod transport;
pub use transport::*;

mod peer;
pub(crate) use peer::*;

mod session;
pub use session::*;
