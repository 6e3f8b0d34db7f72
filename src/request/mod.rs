/*!
 * Request Module
 * Request records, the handle registry, and the dispatcher queue
 */

pub mod manager;
pub mod queue;
pub mod types;

pub use manager::{NodeRef, RequestManager, RequestRecord};
pub use queue::{Message, RequestQueue};
pub use types::{Request, RequestState};
