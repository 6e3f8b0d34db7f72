/*!
 * Server Module
 * The daemon context, the dispatcher thread, and the socket front end
 */

pub mod context;
pub mod dispatcher;
pub mod ingress;
pub mod listener;

pub use context::{Server, ServerBuilder};
pub use dispatcher::Dispatcher;
pub use ingress::{process_request, IngressShared, PeerIdentity};
pub use listener::Listener;
