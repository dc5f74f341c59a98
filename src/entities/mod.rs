pub mod prelude;

pub mod events;
pub mod invites;
pub mod users;
