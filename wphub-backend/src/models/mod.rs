//! Row types and request payloads shared by controllers and the database layer

mod activity;
mod connector;
mod coupon;
mod invoice;
mod message;
mod plugin;
mod project;
mod session;
mod site;
mod subscription;
mod support_ticket;
mod team;
mod theme;
mod user;

pub use activity::*;
pub use connector::*;
pub use coupon::*;
pub use invoice::*;
pub use message::*;
pub use plugin::*;
pub use project::*;
pub use session::*;
pub use site::*;
pub use subscription::*;
pub use support_ticket::*;
pub use team::*;
pub use theme::*;
pub use user::*;
