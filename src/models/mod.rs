pub mod collaborator;
pub mod diagnostics;
pub mod doc_state;
pub mod document;
pub mod error;
pub mod health;
pub mod messages;
pub mod operation;
pub mod session;

pub use collaborator::*;
pub use diagnostics::*;
pub use doc_state::*;
pub use document::*;
pub use error::*;
pub use health::*;
pub use messages::*;
pub use operation::*;
pub use session::*;
