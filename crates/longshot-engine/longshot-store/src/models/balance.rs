use diesel::prelude::*;

use crate::schema::balances;

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = balances)]
pub struct BalanceRow {
    pub user_id: i64,
    pub scope: i64,
    pub available: i64,
    pub escrow: i64,
    pub updated_at: String,
}
