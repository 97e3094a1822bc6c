//! reportflow: turns newly inserted orders into analysis reports.
//!
//! A [`listener::ListenerSupervisor`] watches the order collection and hands
//! every insert to the [`workflow::OrderHandler`], which uploads the file,
//! starts an analysis job and leaves it to the [`poller::PollSupervisor`].
//! Finished reports are post-processed by [`artifacts::ArtifactProcessor`];
//! failed orders are refunded through [`finalize::finalize_order`].

pub mod artifacts;
pub mod cli;
pub mod clients;
pub mod config;
pub mod error;
pub mod extract;
pub mod finalize;
pub mod listener;
pub mod order;
pub mod poller;
pub mod refund;
pub mod server;
pub mod store;
pub mod workflow;

#[cfg(test)]
mod testing;
