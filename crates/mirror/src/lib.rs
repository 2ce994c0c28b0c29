pub mod error;

mod event;
mod feed;
mod membership;

pub use error::{Error, Result};
pub use event::MirrorEvent;
pub use membership::{MembershipMirror, MirrorHandle};
