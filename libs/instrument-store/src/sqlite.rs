use std::str::FromStr;

use async_trait::async_trait;
use sqlx::{
    ConnectOptions, Sqlite, Transaction,
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions},
};
use tracing::{debug, warn};

use crate::{DisplayType, Instrument, InstrumentId, PvId, PvRecord, Storage, StorageTx};

#[derive(Debug, Clone)]
pub struct SqliteStore {
    inner: SqlitePool,
}

impl SqliteStore {
    pub async fn new(uri: impl AsRef<str>) -> Result<Self, sqlx::Error> {
        let uri = uri.as_ref();
        let opts = SqliteConnectOptions::from_str(uri)?
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .create_if_missing(true)
            // make sqlite log queries at trace level so we don't get a bloated log on `info`
            .log_statements(tracing::log::LevelFilter::Trace);

        // in memory sqlite will clear the db after all conns close, and every
        // connection gets its own db. Keep exactly one alive forever.
        let inner = if uri.contains(":memory:") || uri.contains("mode=memory") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(opts)
                .await?
        } else {
            SqlitePool::connect_with(opts).await?
        };
        sqlx::migrate!("../../migrations").run(&inner).await?;
        debug!(?uri, "opened instrument database");
        Ok(Self { inner })
    }
}

/// a transaction on a [`SqliteStore`]; dropping it rolls back
#[derive(Debug)]
pub struct SqliteTx {
    tx: Transaction<'static, Sqlite>,
}

fn to_pv_record((id, name, pvtype): (i64, String, String)) -> PvRecord {
    let display_type = pvtype.parse().unwrap_or_else(|err| {
        warn!(?err, ?name, "stored pv type not recognized");
        DisplayType::Unknown
    });
    PvRecord {
        id: PvId(id),
        name,
        display_type,
    }
}

#[async_trait]
impl Storage for SqliteStore {
    type Error = sqlx::Error;
    type Tx = SqliteTx;

    async fn ensure_instrument(&self, name: &str) -> Result<Instrument, Self::Error> {
        sqlx::query("INSERT INTO instrument (name) VALUES (?1) ON CONFLICT(name) DO NOTHING")
            .bind(name)
            .execute(&self.inner)
            .await?;
        let id: i64 = sqlx::query_scalar("SELECT id FROM instrument WHERE name = ?1")
            .bind(name)
            .fetch_one(&self.inner)
            .await?;
        Ok(Instrument {
            id: InstrumentId(id),
            name: name.to_owned(),
        })
    }

    async fn instrument(&self, name: &str) -> Result<Option<Instrument>, Self::Error> {
        Ok(
            sqlx::query_as::<_, (i64, String)>("SELECT id, name FROM instrument WHERE name = ?1")
                .bind(name)
                .fetch_optional(&self.inner)
                .await?
                .map(|(id, name)| Instrument {
                    id: InstrumentId(id),
                    name,
                }),
        )
    }

    async fn instrument_pvs(&self, id: InstrumentId) -> Result<Vec<PvRecord>, Self::Error> {
        Ok(sqlx::query_as::<_, (i64, String, String)>(
            r#"
            SELECT
                pv.id, pv.name, pv.pvtype
            FROM
                instrument_pv
                JOIN pv ON pv.id = instrument_pv.pv_id
            WHERE
                instrument_pv.instrument_id = ?1
            ORDER BY
                instrument_pv.position
            "#,
        )
        .bind(id.0)
        .fetch_all(&self.inner)
        .await?
        .into_iter()
        .map(to_pv_record)
        .collect())
    }

    async fn pv(&self, name: &str) -> Result<Option<PvRecord>, Self::Error> {
        Ok(sqlx::query_as::<_, (i64, String, String)>(
            "SELECT id, name, pvtype FROM pv WHERE name = ?1",
        )
        .bind(name)
        .fetch_optional(&self.inner)
        .await?
        .map(to_pv_record))
    }

    async fn begin(&self) -> Result<Self::Tx, Self::Error> {
        // TRANSACTION START
        Ok(SqliteTx {
            tx: self.inner.begin().await?,
        })
    }
}

#[async_trait]
impl StorageTx for SqliteTx {
    type Error = sqlx::Error;

    async fn add_pv(&mut self, name: &str, display_type: DisplayType) -> Result<PvId, Self::Error> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO pv (name, pvtype)
            VALUES (?1, ?2)
            ON CONFLICT(name) DO UPDATE SET pvtype = excluded.pvtype
            RETURNING id
            "#,
        )
        .bind(name)
        .bind(display_type.as_str())
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(PvId(id))
    }

    async fn append_pv_to_instrument(
        &mut self,
        instrument: InstrumentId,
        pv: PvId,
    ) -> Result<(), Self::Error> {
        // WHERE on the SELECT is required by sqlite's upsert grammar
        sqlx::query(
            r#"
            INSERT INTO instrument_pv (instrument_id, pv_id, position)
            SELECT ?1, ?2, COALESCE(MAX(position) + 1, 0)
            FROM instrument_pv
            WHERE instrument_id = ?1
            ON CONFLICT(instrument_id, pv_id) DO NOTHING
            "#,
        )
        .bind(instrument.0)
        .bind(pv.0)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self) -> Result<(), Self::Error> {
        // TRANSACTION COMMIT
        self.tx.commit().await
    }

    async fn rollback(self) -> Result<(), Self::Error> {
        // TRANSACTION ROLLBACK
        self.tx.rollback().await
    }
}
