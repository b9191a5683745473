mod flow_control;
mod handle;
mod request;
mod state;
mod store;
mod stream;
mod write_queue;

pub use self::flow_control::{FlowControlWindow, WindowError};
pub use self::handle::StreamHandle;
pub use self::request::{RequestOptions, StreamRequest};
pub use self::state::{ResponseState, StreamState};
pub use self::stream::{SendStatus, StreamStats, StreamType};

pub(crate) use self::flow_control::RecvWindow;
pub(crate) use self::request::Pending;
pub(crate) use self::state::RecvClose;
pub(crate) use self::store::{Key, Store};
pub(crate) use self::stream::{RecvHeaders, Resume, Stream, StreamEvent};
pub(crate) use self::write_queue::{PendingWrite, Producer, WriteQueue};
