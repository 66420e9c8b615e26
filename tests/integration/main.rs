//! Integration tests: full trading ticks against in-memory
//! collaborators and a real in-memory SQLite ledger.

mod mocks;
mod trading_flow;
