pub mod helpdesk;
pub use self::helpdesk::*;
