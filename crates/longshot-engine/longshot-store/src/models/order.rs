use diesel::prelude::*;

use crate::schema::orders;

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = orders)]
pub struct OrderRow {
    pub id: i64,
    pub market_id: i64,
    pub user_id: i64,
    pub side: i32,
    pub kind: i32,
    pub price: i64,
    pub quantity: i64,
    pub filled: i64,
    pub order_status: i32,
    pub created_at_ms: i64,
    pub updated_at: String,
}
