// Per-(channel, model) pricing rows. Cached read-through only — no
// selection logic depends on these. The reference id stays stable across
// upserts so backup/restore cycles keep external references valid.

use rusqlite::{params, Row};

use super::GatewayStore;
use crate::atoms::error::{GatewayError, GatewayResult};
use crate::engine::types::{ChannelModelPrice, ModelPrice};

fn row_to_price(row: &Row<'_>) -> rusqlite::Result<ChannelModelPrice> {
    Ok(ChannelModelPrice {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        model_id: row.get(2)?,
        price: ModelPrice {
            input: row.get(3)?,
            output: row.get(4)?,
        },
        reference_id: row.get(5)?,
    })
}

const PRICE_COLS: &str = "id, channel_id, model_id, input_price, output_price, reference_id";

impl GatewayStore {
    // ── Price CRUD ─────────────────────────────────────────────────────

    /// Insert or update one price row. A fresh row gets the given
    /// reference id (or a new v4 when blank); an existing row keeps its
    /// own.
    pub fn set_channel_model_price(
        &self,
        channel_id: i64,
        model_id: &str,
        price: ModelPrice,
        reference_id: Option<&str>,
    ) -> GatewayResult<ChannelModelPrice> {
        let conn = self.conn();
        let existing: Option<String> = conn
            .query_row(
                "SELECT reference_id FROM channel_model_prices \
                 WHERE channel_id = ?1 AND model_id = ?2",
                params![channel_id, model_id],
                |row| row.get(0),
            )
            .ok();
        let reference = existing.unwrap_or_else(|| {
            reference_id
                .filter(|r| !r.is_empty())
                .map(|r| r.to_string())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
        });
        conn.execute(
            "INSERT INTO channel_model_prices \
             (channel_id, model_id, input_price, output_price, reference_id) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(channel_id, model_id) DO UPDATE SET \
             input_price = ?3, output_price = ?4",
            params![channel_id, model_id, price.input, price.output, reference],
        )?;
        drop(conn);
        self.get_channel_model_price(channel_id, model_id)?
            .ok_or_else(|| GatewayError::not_found(format!("price {}:{}", channel_id, model_id)))
    }

    pub fn get_channel_model_price(
        &self,
        channel_id: i64,
        model_id: &str,
    ) -> GatewayResult<Option<ChannelModelPrice>> {
        let conn = self.conn();
        match conn.query_row(
            &format!(
                "SELECT {PRICE_COLS} FROM channel_model_prices \
                 WHERE channel_id = ?1 AND model_id = ?2"
            ),
            params![channel_id, model_id],
            row_to_price,
        ) {
            Ok(p) => Ok(Some(p)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_channel_prices(&self, channel_id: i64) -> GatewayResult<Vec<ChannelModelPrice>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PRICE_COLS} FROM channel_model_prices \
             WHERE channel_id = ?1 ORDER BY model_id"
        ))?;
        let rows = stmt
            .query_map(params![channel_id], row_to_price)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// All price rows joined with their channel's name — the backup shape.
    pub fn list_prices_with_channel_names(
        &self,
    ) -> GatewayResult<Vec<(String, ChannelModelPrice)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT c.name, p.id, p.channel_id, p.model_id, p.input_price, p.output_price, \
             p.reference_id \
             FROM channel_model_prices p \
             JOIN channels c ON c.id = p.channel_id \
             WHERE c.deleted_at IS NULL \
             ORDER BY c.name, p.model_id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let name: String = row.get(0)?;
                Ok((
                    name,
                    ChannelModelPrice {
                        id: row.get(1)?,
                        channel_id: row.get(2)?,
                        model_id: row.get(3)?,
                        price: ModelPrice {
                            input: row.get(4)?,
                            output: row.get(5)?,
                        },
                        reference_id: row.get(6)?,
                    },
                ))
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::store::channels::tests::test_channel;

    #[test]
    fn upsert_preserves_reference_id() {
        let store = GatewayStore::open_in_memory().unwrap();
        let ch = store.create_channel(&test_channel("c1")).unwrap();
        let first = store
            .set_channel_model_price(ch.id, "gpt-4", ModelPrice { input: 2.5, output: 10.0 }, None)
            .unwrap();
        assert!(!first.reference_id.is_empty());

        let second = store
            .set_channel_model_price(
                ch.id,
                "gpt-4",
                ModelPrice { input: 3.0, output: 12.0 },
                Some("other-ref"),
            )
            .unwrap();
        assert_eq!(second.reference_id, first.reference_id);
        assert_eq!(second.price.input, 3.0);
    }

    #[test]
    fn backup_listing_carries_channel_names() {
        let store = GatewayStore::open_in_memory().unwrap();
        let ch = store.create_channel(&test_channel("c1")).unwrap();
        store
            .set_channel_model_price(ch.id, "gpt-4", ModelPrice { input: 1.0, output: 2.0 }, None)
            .unwrap();
        let rows = store.list_prices_with_channel_names().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, "c1");
        assert_eq!(rows[0].1.model_id, "gpt-4");
    }
}
