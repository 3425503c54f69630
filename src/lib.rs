//! twinhub: building-management backend services.
//!
//! Four service areas share one storage layer and one HTTP surface:
//! tenancy directory (customers, portfolios, users, permissions), sites and
//! floors (including floor module uploads), digital twin read models
//! (assets, points, devices) and workflow (tickets, recurring ticket
//! templates, inspections).

pub mod api;
pub mod cache;
pub mod calendar;
pub mod clients;
pub mod config;
pub mod directory;
pub mod domain;
pub mod error;
pub mod logging;
pub mod observability;
pub mod pagination;
pub mod server;
pub mod sites;
pub mod storage;
pub mod twins;
pub mod workflow;
