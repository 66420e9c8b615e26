//! Autonomous trading agent for Presagio (Omen) prediction markets on
//! Gnosis Chain.
//!
//! The agent watches markets from a configured creator, runs each
//! candidate through a two-stage LLM analysis pipeline, settles
//! committed trades through a Gnosis Safe, and tracks every position
//! in a SQLite ledger until it is resolved and any winnings are
//! redeemed.

pub mod analysis;
pub mod cache;
pub mod chain;
pub mod config;
pub mod dashboard;
pub mod ledger;
pub mod llm;
pub mod monitor;
pub mod notify;
pub mod search;
pub mod subgraph;
pub mod trader;
pub mod types;
