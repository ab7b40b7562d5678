//! The `restaurant_merged` table: one row per registry id, joining the
//! registry columns with what was scraped for that business.

use std::collections::HashMap;

use bizdb_core::MergedRecord;
use sqlx::{Sqlite, SqlitePool};

use crate::DbError;

const CREATE_MERGED_TABLE: &str = "CREATE TABLE IF NOT EXISTS restaurant_merged (
    \"번호\" INTEGER PRIMARY KEY,
    \"사업장명\" TEXT,
    \"인허가일자\" TEXT,
    \"영업상태명\" TEXT,
    \"상세영업상태명\" TEXT,
    \"소재지전체주소\" TEXT,
    \"도로명전체주소\" TEXT,
    \"도로명우편번호\" TEXT,
    \"최종수정시점\" TEXT,
    \"데이터갱신일자\" TEXT,
    \"업태구분명\" TEXT,
    \"네이버_상호명\" TEXT,
    \"네이버_주소\" TEXT,
    \"네이버_전화번호\" TEXT,
    \"네이버_URL\" TEXT,
    \"네이버_PLACE_ID\" TEXT,
    \"네이버_place_info\" TEXT,
    \"네이버_tab_list\" TEXT,
    \"확장\" TEXT
)";

// Re-merging an id refreshes the scraped columns. Extension data written by
// enrichment passes survives unless the new record carries its own.
const UPSERT_MERGED: &str = "INSERT INTO restaurant_merged (
    \"번호\", \"사업장명\", \"인허가일자\", \"영업상태명\", \"상세영업상태명\",
    \"소재지전체주소\", \"도로명전체주소\", \"도로명우편번호\",
    \"최종수정시점\", \"데이터갱신일자\", \"업태구분명\",
    \"네이버_상호명\", \"네이버_주소\", \"네이버_전화번호\",
    \"네이버_URL\", \"네이버_PLACE_ID\", \"네이버_place_info\", \"네이버_tab_list\", \"확장\"
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT(\"번호\") DO UPDATE SET
    \"네이버_상호명\" = excluded.\"네이버_상호명\",
    \"네이버_주소\" = excluded.\"네이버_주소\",
    \"네이버_전화번호\" = excluded.\"네이버_전화번호\",
    \"네이버_URL\" = excluded.\"네이버_URL\",
    \"네이버_PLACE_ID\" = excluded.\"네이버_PLACE_ID\",
    \"네이버_place_info\" = excluded.\"네이버_place_info\",
    \"네이버_tab_list\" = excluded.\"네이버_tab_list\",
    \"확장\" = COALESCE(excluded.\"확장\", restaurant_merged.\"확장\")";

/// # Errors
///
/// Returns [`DbError::Sqlx`] if the statement fails.
pub async fn create_merged_table(pool: &SqlitePool) -> Result<(), DbError> {
    sqlx::query(CREATE_MERGED_TABLE).execute(pool).await?;
    Ok(())
}

/// Insert or refresh one merged row keyed by registry id.
///
/// # Errors
///
/// Returns [`DbError::Encode`] if a JSON column cannot be encoded, or
/// [`DbError::Sqlx`] if the statement fails.
pub async fn upsert_merged_record<'e, E>(executor: E, record: &MergedRecord) -> Result<(), DbError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let place_info = serde_json::to_string(&record.raw_place_info)
        .map_err(|source| DbError::Encode {
            column: "네이버_place_info",
            source,
        })?;
    let tab_list = serde_json::to_string(&record.tab_list).map_err(|source| DbError::Encode {
        column: "네이버_tab_list",
        source,
    })?;
    let extensions = if record.extensions.is_empty() {
        None
    } else {
        Some(
            serde_json::to_string(&record.extensions).map_err(|source| DbError::Encode {
                column: "확장",
                source,
            })?,
        )
    };

    let c = &record.canonical;
    sqlx::query(UPSERT_MERGED)
        .bind(c.id)
        .bind(&c.business_name)
        .bind(&c.license_date)
        .bind(&c.status)
        .bind(&c.detailed_status)
        .bind(&c.lot_address)
        .bind(&c.road_address)
        .bind(&c.postal_code)
        .bind(&c.last_modified)
        .bind(&c.data_updated_at)
        .bind(&c.business_type)
        .bind(&record.scraped_name)
        .bind(&record.scraped_address)
        .bind(&record.scraped_phone)
        .bind(&record.url)
        .bind(&record.place_id)
        .bind(place_info)
        .bind(tab_list)
        .bind(extensions)
        .execute(executor)
        .await?;
    Ok(())
}

/// Upsert a batch in one transaction. Returns the number of rows written.
///
/// # Errors
///
/// Returns the first [`DbError`]; the transaction is rolled back.
pub async fn upsert_merged_records(
    pool: &SqlitePool,
    records: &[MergedRecord],
) -> Result<usize, DbError> {
    let mut tx = pool.begin().await?;
    for record in records {
        upsert_merged_record(&mut *tx, record).await?;
    }
    tx.commit().await?;
    tracing::info!(rows = records.len(), "merged rows written");
    Ok(records.len())
}

/// Place ids already recorded for registry rows, keyed by registry id.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn load_known_place_ids(pool: &SqlitePool) -> Result<HashMap<i64, String>, DbError> {
    let rows: Vec<(i64, String)> = sqlx::query_as(
        "SELECT \"번호\", \"네이버_PLACE_ID\" FROM restaurant_merged \
         WHERE \"네이버_PLACE_ID\" IS NOT NULL AND \"네이버_PLACE_ID\" <> ''",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().collect())
}
