pub use super::events::Entity as Events;
pub use super::invites::Entity as Invites;
pub use super::users::Entity as Users;
