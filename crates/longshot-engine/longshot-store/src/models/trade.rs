use diesel::prelude::*;

use crate::schema::trades;

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = trades)]
pub struct TradeRow {
    pub id: i64,
    pub market_id: i64,
    pub side: i32,
    pub kind: i32,
    pub price: i64,
    pub quantity: i64,
    pub buyer_id: i64,
    pub seller_id: Option<i64>,
    pub created_at_ms: i64,
}
