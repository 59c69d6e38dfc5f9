//! Domain model (ids, names, envelopes, options, states, errors).

pub mod envelope;
pub mod errors;
pub mod ids;
pub mod info;
pub mod options;
pub mod state;
pub mod task_name;

pub use self::envelope::TaskEnvelope;
pub use self::errors::{ErrorKind, HandlerError};
pub use self::ids::TaskId;
pub use self::info::TaskInfo;
pub use self::options::{DeliveryOptions, QueueName};
pub use self::state::TaskState;
pub use self::task_name::TaskName;
