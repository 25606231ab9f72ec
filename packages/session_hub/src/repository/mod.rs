// Repository layer: each table lives in its own file with `impl HubRepository`.

use sqlx::sqlite::SqlitePool;

mod session_status;
mod tokens;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use session_status::SessionStatusRecord;

#[derive(Clone)]
pub struct HubRepository {
    pub(crate) pool: SqlitePool,
}

impl HubRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}
