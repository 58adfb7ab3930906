use sqlx::{Database, Pool, Transaction};

/// A transactional handle valid for one request.
///
/// Dropping a session that was not committed rolls it back and hands the
/// connection back to the pool, so early returns and `?` need no cleanup.
pub struct Session<DB: Database> {
    tx: Transaction<'static, DB>,
}

impl<DB: Database> Session<DB> {
    pub async fn begin(pool: &Pool<DB>) -> Result<Self, sqlx::Error> {
        let tx = pool.begin().await?;
        tracing::trace!("session opened");
        Ok(Self { tx })
    }

    pub fn conn(&mut self) -> &mut DB::Connection {
        &mut self.tx
    }

    /// A failed commit leaves the transaction open inside sqlx, which then
    /// rolls it back when it is dropped.
    pub async fn commit(self) -> Result<(), sqlx::Error> {
        match self.tx.commit().await {
            Ok(()) => {
                tracing::trace!("session committed");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "commit failed, rolling back");
                Err(e)
            }
        }
    }
}
