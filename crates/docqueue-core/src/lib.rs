//! # docqueue core
//!
//! Store-free logic shared by every docqueue component: the queue data
//! model, deterministic run identity, failure classification for the
//! dead-letter queue, and the health/alert threshold rules.
//!
//! This crate contains no tokio, sqlx, or filesystem I/O. Everything here
//! is a pure function of its inputs, which is what lets the SQLite-backed
//! crate and its tests share one definition of "healthy" or "same run".

pub mod alerts;
pub mod failure;
pub mod health;
pub mod models;
pub mod run_id;
