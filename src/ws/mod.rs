pub mod actor;
pub mod gate;
pub mod handler;
pub mod hub;
pub mod liveness;
pub mod registry;
pub mod session;

pub use actor::{Author, DocumentActor, DocumentHandle};
pub use gate::{Admission, ConnectionGate};
pub use handler::websocket_handler;
pub use hub::{BroadcastHub, HubEvent, HubMessage};
pub use registry::{SessionKey, SessionRegistry};
pub use session::{run_session, Inbound, SessionEnd};
