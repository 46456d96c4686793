//! The collector: object schemas, the stop-the-world mark/evacuate cycle and
//! the debug verifiers.

pub mod collector;
pub mod schema;
pub mod verify;
