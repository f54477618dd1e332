use diesel::prelude::*;

use crate::schema::markets;

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = markets)]
pub struct MarketRow {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub scope: i64,
    pub market_status: i32,
    pub outcome: Option<i32>,
    pub volume: i64,
    pub resolve_at: Option<i64>,
    pub created_at_ms: i64,
    pub updated_at: String,
}
