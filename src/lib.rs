//! Main crate for the `clouddns_sync` application.
//!
//! Synchronizes DNS records in cloud providers with a declared set of
//! desired endpoints, tracking ownership of the records it manages through
//! heritage TXT records so that multiple instances can share zones safely.
//!
//! The crate is usable as a library: assemble a [`source::Source`], a
//! [`provider::Provider`] wrapped in a [`registry::Registry`] and drive them
//! with a [`controller::Controller`].

pub mod cancel;
pub mod config;
pub mod controller;
pub mod endpoint;
pub mod plan;
pub mod provider;
pub mod registry;
pub mod source;
