//! Session identity: normalization of caller-supplied ids and the registry
//! of live sessions.

pub mod ids;
pub mod registry;

pub use ids::{is_canonical, resolve, validate};
pub use registry::{Session, SessionRegistry};
