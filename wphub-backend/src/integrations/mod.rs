//! Outbound HTTP clients: Stripe, the WordPress connector plugin and wordpress.org

pub mod directory;
pub mod stripe;
pub mod wordpress;

pub use directory::{DirectoryClient, DirectoryError};
pub use stripe::{StripeClient, StripeError};
pub use wordpress::{ConnectorClient, ConnectorError};
