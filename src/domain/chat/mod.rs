//! Chat domain - sessions and their messages, co-located in one partition
//! per session

mod batch_item;
mod message;
mod session;

pub use batch_item::{BatchItem, MESSAGE_TYPE, SESSION_TYPE};
pub use message::{Message, MessageRole};
pub use session::{Session, DEFAULT_SESSION_NAME};
