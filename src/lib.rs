pub mod auth;
pub mod availability;
pub mod booking;
pub mod calendar;
pub mod catalog;
pub mod config;
pub mod error;
pub mod http;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod report;
pub mod store;
