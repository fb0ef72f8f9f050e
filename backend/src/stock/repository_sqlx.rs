use async_trait::async_trait;
use sqlx::{AnyPool, Row};
use uuid::Uuid;

use crate::error::AppError;
use crate::stock::{StockItem, StockLevel, StockRepository, StockType};
use crate::tenant;

/// SQLx-backed stock repository. Responsible only for persistence and
/// row mapping; every call filters by the ambient tenant.
pub struct SqlxStockRepository {
    pool: AnyPool,
}

impl SqlxStockRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StockRepository for SqlxStockRepository {
    async fn candidates(
        &self,
        material_type_id: &Uuid,
        thickness: u32,
        stock_type: StockType,
    ) -> Result<Vec<StockItem>, AppError> {
        let tenant_id = tenant::current()?;

        let rows = sqlx::query(
            r#"
SELECT
  id, tenant_id, code, name, material_type_id, thickness, stock_type,
  length, width, height, quantity, reserved_qty, unit_price,
  CAST(is_from_waste AS INTEGER) AS is_from_waste_i, location_id
FROM stock_items
WHERE tenant_id = ?
  AND material_type_id = ?
  AND thickness = ?
  AND stock_type = ?
  AND quantity - reserved_qty > 0
ORDER BY unit_price ASC, id ASC;
"#,
        )
        .bind(tenant_id.to_string())
        .bind(material_type_id.to_string())
        .bind(thickness as i64)
        .bind(stock_type.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            match row_to_stock_item(&r) {
                Ok(item) => out.push(item),
                Err(e) => {
                    // poison-row resilience: skip but don't fail the batch
                    tracing::warn!(error = %e, "skipping malformed stock row");
                }
            }
        }
        Ok(out)
    }

    async fn levels(&self, stock_item_ids: &[Uuid]) -> Result<Vec<StockLevel>, AppError> {
        let tenant_id = tenant::current()?;

        let mut out = Vec::with_capacity(stock_item_ids.len());
        for id in stock_item_ids {
            let row = sqlx::query(
                r#"SELECT quantity, reserved_qty FROM stock_items WHERE tenant_id = ? AND id = ?;"#,
            )
            .bind(tenant_id.to_string())
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

            if let Some(r) = row {
                out.push(StockLevel {
                    stock_item_id: *id,
                    quantity: r.get::<i64, _>("quantity"),
                    reserved_qty: r.get::<i64, _>("reserved_qty"),
                });
            }
        }
        Ok(out)
    }
}

fn row_to_stock_item(r: &sqlx::any::AnyRow) -> Result<StockItem, AppError> {
    let parse_uuid = |field: &str| -> Result<Uuid, AppError> {
        let s: String = r.get(field);
        Uuid::parse_str(&s).map_err(|_| AppError::Internal(format!("invalid uuid in {field}")))
    };

    let stock_type_s: String = r.get("stock_type");
    let stock_type = StockType::parse(&stock_type_s)
        .ok_or_else(|| AppError::Internal(format!("unknown stock type {stock_type_s}")))?;

    let opt_mm = |field: &str| -> Result<Option<u32>, AppError> {
        match r.get::<Option<i64>, _>(field) {
            None => Ok(None),
            Some(v) => Ok(Some(i64_to_mm(v)?)),
        }
    };

    let location_id = match r.get::<Option<String>, _>("location_id") {
        None => None,
        Some(s) => Some(
            Uuid::parse_str(&s).map_err(|_| AppError::Internal("invalid location uuid".into()))?,
        ),
    };

    Ok(StockItem {
        id: parse_uuid("id")?,
        tenant_id: parse_uuid("tenant_id")?,
        code: r.get("code"),
        name: r.get("name"),
        material_type_id: parse_uuid("material_type_id")?,
        thickness: i64_to_mm(r.get("thickness"))?,
        stock_type,
        length: opt_mm("length")?,
        width: opt_mm("width")?,
        height: opt_mm("height")?,
        quantity: r.get("quantity"),
        reserved_qty: r.get("reserved_qty"),
        unit_price: r.get("unit_price"),
        is_from_waste: r.get::<i64, _>("is_from_waste_i") != 0,
        location_id,
    })
}

pub(crate) fn i64_to_mm(v: i64) -> Result<u32, AppError> {
    if v < 0 || v > u32::MAX as i64 {
        return Err(AppError::Internal(format!("dimension out of range: {v}")));
    }
    Ok(v as u32)
}
