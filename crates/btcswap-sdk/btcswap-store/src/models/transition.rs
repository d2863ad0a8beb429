use diesel::prelude::*;

use crate::schema::swap_transitions;

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = swap_transitions)]
pub struct TransitionRow {
    pub id: i32,
    pub swap_id: String,
    pub phase: i32,
    pub message: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = swap_transitions)]
pub struct NewTransitionRow {
    pub swap_id: String,
    pub phase: i32,
    pub message: String,
}
