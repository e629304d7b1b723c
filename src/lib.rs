//! Periodic RSS/Atom ingestion into SQLite, with a small read API.
//!
//! A [`scheduler::Scheduler`] runs a [`feed::Pipeline`] (fetch → parse →
//! save) over every configured feed on a fixed interval. Entries are stored
//! once per link by [`storage::Database`] and served newest-first by
//! [`api::NewsService`].

pub mod api;
pub mod config;
pub mod feed;
pub mod scheduler;
pub mod storage;
pub mod util;
