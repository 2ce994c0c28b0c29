mod group;
mod message;
mod user;

pub use group::GroupRecord;
pub use message::ChatMessage;
pub use user::UserProfile;
