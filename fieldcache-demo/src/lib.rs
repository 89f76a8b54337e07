pub mod data;
pub mod gateway;
pub mod policies;
pub mod scenario;
pub mod schema;
pub mod script;

pub use data::{DataError, DataStore, Group, GroupId, User, UserId};
pub use gateway::Gateway;
pub use scenario::ScenarioReport;
pub use schema::{resolve_field, ResolveError};
pub use script::{Invocation, Outcome, ScriptError};
