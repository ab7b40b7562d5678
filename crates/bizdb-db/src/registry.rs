//! Read access to the business registry (`restaurants` table).

use bizdb_core::CanonicalRecord;
use sqlx::SqlitePool;

use crate::DbError;

/// Registry columns, aliased to `CanonicalRecord` field names. Everything but
/// the id is read as text whatever its declared affinity.
const SELECT_REGISTRY: &str = "SELECT CAST(\"번호\" AS INTEGER) AS id, \
            CAST(\"사업장명\" AS TEXT) AS business_name, \
            CAST(\"도로명전체주소\" AS TEXT) AS road_address, \
            CAST(\"소재지전체주소\" AS TEXT) AS lot_address, \
            CAST(\"도로명우편번호\" AS TEXT) AS postal_code, \
            CAST(\"영업상태명\" AS TEXT) AS status, \
            CAST(\"상세영업상태명\" AS TEXT) AS detailed_status, \
            CAST(\"업태구분명\" AS TEXT) AS business_type, \
            CAST(\"인허가일자\" AS TEXT) AS license_date, \
            CAST(\"최종수정시점\" AS TEXT) AS last_modified, \
            CAST(\"데이터갱신일자\" AS TEXT) AS data_updated_at \
     FROM restaurants \
     ORDER BY \"번호\"";

/// Half-open row range `[start, end)` over the registry in id order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    pub start: u64,
    pub end: u64,
}

impl Partition {
    /// # Errors
    ///
    /// Returns [`DbError::InvalidPartition`] when `start > end`.
    pub fn new(start: u64, end: u64) -> Result<Self, DbError> {
        if start > end {
            return Err(DbError::InvalidPartition { start, end });
        }
        Ok(Self { start, end })
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RegistryRow {
    id: i64,
    business_name: Option<String>,
    road_address: Option<String>,
    lot_address: Option<String>,
    postal_code: Option<String>,
    status: Option<String>,
    detailed_status: Option<String>,
    business_type: Option<String>,
    license_date: Option<String>,
    last_modified: Option<String>,
    data_updated_at: Option<String>,
}

impl From<RegistryRow> for CanonicalRecord {
    fn from(row: RegistryRow) -> Self {
        Self {
            id: row.id,
            business_name: row.business_name,
            road_address: row.road_address,
            lot_address: row.lot_address,
            postal_code: row.postal_code,
            status: row.status,
            detailed_status: row.detailed_status,
            business_type: row.business_type,
            license_date: row.license_date,
            last_modified: row.last_modified,
            data_updated_at: row.data_updated_at,
        }
    }
}

/// Load registry rows in id order, optionally restricted to a partition.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn load_canonical_records(
    pool: &SqlitePool,
    partition: Option<Partition>,
) -> Result<Vec<CanonicalRecord>, DbError> {
    let rows = match partition {
        Some(p) => {
            let sql = format!("{SELECT_REGISTRY} LIMIT ? OFFSET ?");
            sqlx::query_as::<_, RegistryRow>(&sql)
                .bind(to_i64(p.len()))
                .bind(to_i64(p.start))
                .fetch_all(pool)
                .await?
        }
        None => {
            sqlx::query_as::<_, RegistryRow>(SELECT_REGISTRY)
                .fetch_all(pool)
                .await?
        }
    };

    tracing::debug!(rows = rows.len(), ?partition, "registry rows loaded");
    Ok(rows.into_iter().map(CanonicalRecord::from).collect())
}

/// Number of rows in the registry.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn count_canonical_records(pool: &SqlitePool) -> Result<u64, DbError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM restaurants")
        .fetch_one(pool)
        .await?;
    Ok(u64::try_from(count).unwrap_or(0))
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_rejects_inverted_bounds() {
        assert!(matches!(
            Partition::new(10, 5),
            Err(DbError::InvalidPartition { start: 10, end: 5 })
        ));
        let p = Partition::new(200, 400).unwrap();
        assert_eq!(p.len(), 200);
        assert!(!p.is_empty());
        assert!(Partition::new(3, 3).unwrap().is_empty());
    }
}
