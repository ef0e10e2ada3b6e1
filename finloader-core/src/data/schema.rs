//! On-disk bar schema and series integrity checks.

use super::provider::DataError;
use crate::domain::Bar;
use polars::prelude::*;

pub const TIME_COLUMN: &str = "time";
pub const VALUE_COLUMNS: [&str; 5] = ["open", "high", "low", "close", "volume"];

/// Expected schema for a stored series.
///
/// `time` holds UTC epoch milliseconds; the column carries no zone because
/// every timestamp in the store is UTC.
pub struct BarSchema;

impl BarSchema {
    pub fn time_dtype() -> DataType {
        DataType::Datetime(TimeUnit::Milliseconds, None)
    }

    /// Get the canonical bar schema
    pub fn schema() -> Schema {
        let mut fields = vec![Field::new(TIME_COLUMN.into(), Self::time_dtype())];
        fields.extend(
            VALUE_COLUMNS
                .iter()
                .map(|name| Field::new((*name).into(), DataType::Float64)),
        );
        Schema::from_iter(fields)
    }

    /// Validate DataFrame against schema
    pub fn validate(df: &DataFrame) -> Result<(), SchemaError> {
        let expected = Self::schema();
        let actual = df.schema();

        for field in expected.iter_fields() {
            let actual_dtype = actual
                .get(field.name())
                .ok_or_else(|| SchemaError::MissingColumn(field.name().to_string()))?;
            if actual_dtype != field.dtype() {
                return Err(SchemaError::TypeMismatch {
                    column: field.name().to_string(),
                    expected: field.dtype().clone(),
                    actual: actual_dtype.clone(),
                });
            }
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Missing required column: {0}")]
    MissingColumn(String),

    #[error("Type mismatch in column {column}: expected {expected:?}, got {actual:?}")]
    TypeMismatch {
        column: String,
        expected: DataType,
        actual: DataType,
    },
}

impl From<SchemaError> for DataError {
    fn from(e: SchemaError) -> Self {
        DataError::Validation(format!("schema mismatch: {e}"))
    }
}

/// Check integrity of a series: strictly increasing timestamps.
///
/// UTC is guaranteed by `DateTime<Utc>`. An empty series is valid.
pub fn validate_series(bars: &[Bar]) -> Result<(), DataError> {
    for (i, pair) in bars.windows(2).enumerate() {
        let (prev, next) = (&pair[0], &pair[1]);
        if next.time == prev.time {
            return Err(DataError::Validation(format!(
                "duplicate timestamp detected: {} (row {})",
                next.time,
                i + 1
            )));
        }
        if next.time < prev.time {
            return Err(DataError::Validation(format!(
                "series must be sorted: {} follows {} (row {})",
                next.time,
                prev.time,
                i + 1
            )));
        }
    }
    Ok(())
}
