//! Human-in-the-loop approval gateway: holds records pending a binary
//! decision, enforces lazy expiration through a periodic sweep, and makes
//! every decision durable before the physical move (log-then-move).

mod gateway;

pub use gateway::{ApprovalGateway, Decision};

pub const EXPIRED_REASON: &str = "expired";
