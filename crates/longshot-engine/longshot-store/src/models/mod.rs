pub mod balance;
pub mod market;
pub mod order;
pub mod position;
pub mod trade;
pub mod user;

pub use balance::BalanceRow;
pub use market::MarketRow;
pub use order::OrderRow;
pub use position::PositionRow;
pub use trade::TradeRow;
pub use user::{NewUserRow, UserRow};
