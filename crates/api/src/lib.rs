//! HTTP host of the queue engine: the async callback endpoint, health and
//! read-only queue item lookup.

pub mod app;
