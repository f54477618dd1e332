use diesel::prelude::*;

use crate::schema::positions;

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = positions)]
pub struct PositionRow {
    pub user_id: i64,
    pub market_id: i64,
    pub yes_shares: i64,
    pub no_shares: i64,
    pub yes_reserved: i64,
    pub no_reserved: i64,
    pub yes_cost: i64,
    pub no_cost: i64,
    pub updated_at: String,
}
