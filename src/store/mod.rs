//! Durable tables: market descriptors, raw/filtered ticks, EWMA state, alert
//! state. The store is the sole shared mutable state in the process — the
//! raw-plus-filtered append and the EWMA read-then-write are each done inside
//! a single SQLite transaction so they behave as atomic units even if the
//! collector is ever parallelized per market.

use sqlx::SqlitePool;
use tracing::error;

use crate::config::{FILTERED_TICK_RETENTION, RAW_TICK_RETENTION};
use crate::error::Result;
use crate::types::{AlertState, EwmaState, MarketDescriptor, MarketType, Tick};

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn connect(db_path: &str) -> Result<Self> {
        let pool = SqlitePool::connect(&format!("sqlite:{db_path}?mode=rwc")).await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    // -- streams --------------------------------------------------------

    /// Created and updated by the catalog walker; never deleted by the core.
    pub async fn upsert_stream(&self, m: &MarketDescriptor) -> Result<()> {
        let market_type = m.market_type.map(|t| t.to_string());
        sqlx::query!(
            r#"
            INSERT INTO streams (market_id, yes_token_id, title, parent_market_id, topic_id, market_type, chain_id, cutoff_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(market_id) DO UPDATE SET
                yes_token_id = excluded.yes_token_id,
                title = excluded.title,
                parent_market_id = excluded.parent_market_id,
                topic_id = excluded.topic_id,
                market_type = excluded.market_type,
                chain_id = excluded.chain_id,
                cutoff_at = excluded.cutoff_at,
                updated_at = excluded.updated_at
            "#,
            m.market_id,
            m.yes_token_id,
            m.title,
            m.parent_market_id,
            m.topic_id,
            market_type,
            m.chain_id,
            m.cutoff_at,
            m.updated_at,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_stream(&self, market_id: i64) -> Result<Option<MarketDescriptor>> {
        let row = sqlx::query!(
            r#"SELECT market_id, yes_token_id, title, parent_market_id, topic_id, market_type, chain_id, cutoff_at, updated_at FROM streams WHERE market_id = ?"#,
            market_id
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| MarketDescriptor {
            market_id: r.market_id,
            yes_token_id: r.yes_token_id,
            title: r.title,
            parent_market_id: r.parent_market_id,
            topic_id: r.topic_id,
            market_type: r.market_type.as_deref().and_then(parse_market_type),
            chain_id: r.chain_id,
            cutoff_at: r.cutoff_at,
            updated_at: r.updated_at,
        }))
    }

    pub async fn list_streams(&self) -> Result<Vec<MarketDescriptor>> {
        let rows = sqlx::query!(
            r#"SELECT market_id, yes_token_id, title, parent_market_id, topic_id, market_type, chain_id, cutoff_at, updated_at FROM streams"#
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| MarketDescriptor {
                market_id: r.market_id,
                yes_token_id: r.yes_token_id,
                title: r.title,
                parent_market_id: r.parent_market_id,
                topic_id: r.topic_id,
                market_type: r.market_type.as_deref().and_then(parse_market_type),
                chain_id: r.chain_id,
                cutoff_at: r.cutoff_at,
                updated_at: r.updated_at,
            })
            .collect())
    }

    // -- ticks ------------------------------------------------------------

    pub async fn latest_raw_tick(&self, market_id: i64) -> Result<Option<Tick>> {
        let row = sqlx::query!(
            r#"SELECT market_id, ts, yes_price, volume, delta_volume FROM raw_ticks WHERE market_id = ? ORDER BY ts DESC LIMIT 1"#,
            market_id
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Tick {
            market_id: r.market_id,
            ts: r.ts,
            yes_price: r.yes_price,
            volume: r.volume,
            delta_volume: r.delta_volume,
        }))
    }

    /// Oldest-first, most recent `limit` filtered ticks — used to seed the
    /// EWMA estimator on cold start.
    pub async fn recent_filtered_ticks(&self, market_id: i64, limit: i64) -> Result<Vec<Tick>> {
        let rows = sqlx::query!(
            r#"SELECT market_id, ts, yes_price, volume, delta_volume FROM filtered_ticks WHERE market_id = ? ORDER BY ts DESC LIMIT ?"#,
            market_id,
            limit
        )
        .fetch_all(&self.pool)
        .await?;

        let mut ticks: Vec<Tick> = rows
            .into_iter()
            .map(|r| Tick {
                market_id: r.market_id,
                ts: r.ts,
                yes_price: r.yes_price,
                volume: r.volume,
                delta_volume: r.delta_volume,
            })
            .collect();
        ticks.reverse();
        Ok(ticks)
    }

    pub async fn recent_raw_ticks(&self, market_id: i64, limit: i64) -> Result<Vec<Tick>> {
        let rows = sqlx::query!(
            r#"SELECT market_id, ts, yes_price, volume, delta_volume FROM raw_ticks WHERE market_id = ? ORDER BY ts DESC LIMIT ?"#,
            market_id,
            limit
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| Tick {
                market_id: r.market_id,
                ts: r.ts,
                yes_price: r.yes_price,
                volume: r.volume,
                delta_volume: r.delta_volume,
            })
            .collect())
    }

    /// Appends `tick` to raw, and — if `accepted` — to filtered in the same
    /// transaction, then prunes both tables back to their retention bounds.
    pub async fn insert_tick(&self, tick: &Tick, accepted: bool) -> Result<()> {
        let mut txn = self.pool.begin().await?;

        sqlx::query!(
            r#"INSERT OR REPLACE INTO raw_ticks (market_id, ts, yes_price, volume, delta_volume) VALUES (?, ?, ?, ?, ?)"#,
            tick.market_id,
            tick.ts,
            tick.yes_price,
            tick.volume,
            tick.delta_volume,
        )
        .execute(&mut *txn)
        .await?;
        prune(&mut txn, "raw_ticks", tick.market_id, RAW_TICK_RETENTION).await?;

        if accepted {
            sqlx::query!(
                r#"INSERT OR REPLACE INTO filtered_ticks (market_id, ts, yes_price, volume, delta_volume) VALUES (?, ?, ?, ?, ?)"#,
                tick.market_id,
                tick.ts,
                tick.yes_price,
                tick.volume,
                tick.delta_volume,
            )
            .execute(&mut *txn)
            .await?;
            prune(&mut txn, "filtered_ticks", tick.market_id, FILTERED_TICK_RETENTION).await?;
        }

        txn.commit().await?;
        Ok(())
    }

    // -- EWMA state -------------------------------------------------------

    pub async fn get_ewma_state(&self, market_id: i64) -> Result<Option<EwmaState>> {
        let row = sqlx::query!(
            r#"SELECT price_mean, price_var, volume_mean, volume_var, last_price, tick_count FROM ewma_state WHERE market_id = ?"#,
            market_id
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| EwmaState {
            price_mean: r.price_mean,
            price_var: r.price_var,
            volume_mean: r.volume_mean,
            volume_var: r.volume_var,
            last_price: r.last_price,
            tick_count: r.tick_count as u32,
        }))
    }

    pub async fn put_ewma_state(&self, market_id: i64, s: &EwmaState) -> Result<()> {
        let tick_count = s.tick_count as i64;
        sqlx::query!(
            r#"
            INSERT INTO ewma_state (market_id, price_mean, price_var, volume_mean, volume_var, last_price, tick_count)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(market_id) DO UPDATE SET
                price_mean = excluded.price_mean,
                price_var = excluded.price_var,
                volume_mean = excluded.volume_mean,
                volume_var = excluded.volume_var,
                last_price = excluded.last_price,
                tick_count = excluded.tick_count
            "#,
            market_id,
            s.price_mean,
            s.price_var,
            s.volume_mean,
            s.volume_var,
            s.last_price,
            tick_count,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // -- alert state --------------------------------------------------------

    pub async fn get_alert_state(&self, market_id: i64) -> Result<AlertState> {
        let row = sqlx::query!(
            r#"SELECT last_alert_at, last_alert_hash FROM alerts WHERE market_id = ?"#,
            market_id
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row
            .map(|r| AlertState {
                last_alert_at: r.last_alert_at,
                last_alert_hash: r.last_alert_hash,
            })
            .unwrap_or_default())
    }

    pub async fn put_alert_state(&self, market_id: i64, s: &AlertState) -> Result<()> {
        sqlx::query!(
            r#"
            INSERT INTO alerts (market_id, last_alert_at, last_alert_hash)
            VALUES (?, ?, ?)
            ON CONFLICT(market_id) DO UPDATE SET
                last_alert_at = excluded.last_alert_at,
                last_alert_hash = excluded.last_alert_hash
            "#,
            market_id,
            s.last_alert_at,
            s.last_alert_hash,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Most recently fired alerts across all markets, newest first.
    pub async fn recent_alerts(&self, limit: i64) -> Result<Vec<(i64, Option<i64>, Option<String>)>> {
        let rows = sqlx::query!(
            r#"SELECT market_id, last_alert_at, last_alert_hash FROM alerts WHERE last_alert_at IS NOT NULL ORDER BY last_alert_at DESC LIMIT ?"#,
            limit
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| (r.market_id, r.last_alert_at, r.last_alert_hash)).collect())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn prune(
    txn: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    table: &str,
    market_id: i64,
    keep: i64,
) -> Result<()> {
    let sql = format!(
        "DELETE FROM {table} WHERE market_id = ? AND ts NOT IN \
         (SELECT ts FROM {table} WHERE market_id = ? ORDER BY ts DESC LIMIT ?)"
    );
    if let Err(e) = sqlx::query(&sql)
        .bind(market_id)
        .bind(market_id)
        .bind(keep)
        .execute(&mut **txn)
        .await
    {
        error!(table, market_id, "tick retention prune failed: {e}");
        return Err(e.into());
    }
    Ok(())
}

fn parse_market_type(s: &str) -> Option<MarketType> {
    match s {
        "multi_parent" => Some(MarketType::MultiParent),
        "single" => Some(MarketType::Single),
        _ => None,
    }
}
