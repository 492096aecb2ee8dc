//! Scanorama Store — PostgreSQL persistence for networks, hosts, jobs,
//! schedules, profiles, and API keys.
//!
//! This crate is the single mutation point for the relational store. All
//! reads and writes flow through [`Store`] so that multi-row operations
//! (config seeding, exclusion replacement, job transitions) stay
//! transactional and row mapping stays in one place.

pub mod apikeys;
pub mod client;
pub mod hosts;
pub mod jobs;
pub mod networks;
pub mod profiles;
pub mod schedules;

pub use client::{Store, StoreError};
pub use hosts::HostFilter;
pub use networks::{SeedNetwork, SeedReport};
