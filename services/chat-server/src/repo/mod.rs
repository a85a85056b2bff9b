pub mod groups;
pub mod messages;
pub mod tokens;

pub use messages::PgMessageStore;
pub use groups::PgMembershipOracle;
