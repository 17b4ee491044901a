pub mod diagnostics;
pub mod doc_state;
pub mod health;

pub use diagnostics::*;
pub use doc_state::*;
pub use health::*;
