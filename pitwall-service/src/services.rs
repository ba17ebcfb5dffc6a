//! Core services that make up the pitwall backend.
//!
//! This module exposes all internal services used by the backend to handle
//! storage, tokens, push delivery, queueing, and the ingestion pipeline.
//! Each service encapsulates a specific responsibility and is used by
//! higher-level components such as the API or the worker pump.
//!
//! # Services overview
//!
//! - [`analytics`] – filters, groups, buckets, and summarizes stored sessions.
//! - [`auth`] – OAuth exchange, driver upsert, token mint.
//! - [`connections`] – in-process registry of live websocket senders.
//! - [`ingestion`] – the per-driver ingestion pipeline.
//! - [`journal`] – journal entries joined with session data.
//! - [`push`] – per-connection send and per-driver fan-out with reaping.
//! - [`queue`] – the durable ingestion-job queue.
//! - [`store`] – persistence of drivers, sessions, journal, connections, locks.
//! - [`token`] – session-token create/validate over pluggable key providers.
//! - [`worker`] – the queue pump driving the ingestion engine.

pub mod analytics;
pub mod auth;
pub mod connections;
pub mod ingestion;
pub mod journal;
pub mod push;
pub mod queue;
pub mod store;
pub mod token;
pub mod worker;
