pub mod beacon;
pub mod event;
pub mod goal;
pub mod session;
pub mod website;

pub use beacon::{Beacon, BeaconKind, BeaconPayload};
pub use event::{Event, EventType, NewEvent, Utm};
pub use goal::{Goal, GoalCompletion, GoalKind, NewGoalCompletion};
pub use session::{NewSession, Session};
pub use website::Website;
