#![forbid(unsafe_code)]

//! Daemon-side components: lock registry, verification job runner,
//! review-service client, and the supervisory dispatcher.

pub mod dispatch;
pub mod job;
pub mod locks;
pub mod service;
