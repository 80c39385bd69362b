//! The purpose of this module is to alleviate the need to import many of the `[courier]` types.
//!
//! ```
//! # #![allow(unused_imports)]
//! use courier::prelude::*;
//! ```
pub use crate::config::DispatcherConfig;
pub use crate::deliver::{Deliver, DeliveryError};
pub use crate::job::{Attachment, AttachmentSource, Job, Payload, Template};
pub use crate::queue::memory::MemoryQueue;
pub use crate::queue::{Queue, QueueError};
pub use crate::retry::RetryPolicy;
pub use crate::{CourierError, Dispatcher};
