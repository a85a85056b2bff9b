pub mod delivery;
pub mod error;
pub mod hub;
pub mod membership;
pub mod model;
pub mod session;
pub mod store;

pub use delivery::DeliveryService;
pub use error::{DeliveryError, StoreError};
pub use hub::{Hub, HubHandle, SessionHandle};
pub use membership::MembershipOracle;
pub use model::{
    ConversationRow, Message, MessageKind, MessageStatus, NewMessage, RecipientClass, TypingSignal,
};
pub use store::MessageStore;
