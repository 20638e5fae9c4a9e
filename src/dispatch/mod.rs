pub mod actions;
pub mod confirmation;
pub mod conversation;
pub mod dispatcher;
pub mod fastpath;
pub mod filter;

pub use actions::{ActionRegistry, ACTION_PREFIX};
pub use confirmation::PendingConfirmation;
pub use conversation::ConversationWindow;
pub use dispatcher::{choose_tier, Dispatcher};
pub use fastpath::FastAction;
