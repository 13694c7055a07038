//! Database model modules - extends Database with domain-specific methods
//!
//! Each module adds `impl Database` blocks with methods for a specific table group.

mod activity;      // activity_logs
mod auth;          // auth_sessions
mod billing;       // subscription_plans, user_subscriptions, invoices
mod connectors;    // connectors
mod coupons;       // coupons, coupon_usage
mod library;       // plugins, themes
mod messages;      // messages, notifications
mod projects;      // projects
mod sites;         // sites
mod support;       // support_tickets
mod teams;         // teams, team_members, team_roles
mod users;         // users

pub use coupons::NewCoupon;
