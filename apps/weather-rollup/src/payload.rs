use crate::error::ValidationError;
use crate::rollup::Reading;
use chrono::{DateTime, Utc};
use simd_json::prelude::ValueAsScalar;
use simd_json::BorrowedValue;

const FIELD_PLACE_ID: &str = "placeId";
const FIELD_TEMPERATURE: &str = "temperature";
const FIELD_HUMIDITY: &str = "humidity";

/// Decodes one `{placeId, temperature, humidity}` payload. The buffer is parsed in place.
pub fn parse_reading_payload(
    payload: &mut [u8],
    received_at: DateTime<Utc>,
) -> Result<Reading, ValidationError> {
    let value = simd_json::to_borrowed_value(payload)
        .map_err(|err| ValidationError::Malformed(err.to_string()))?;
    let BorrowedValue::Object(obj) = value else {
        return Err(ValidationError::NotAnObject);
    };

    let location_id = match obj.get(FIELD_PLACE_ID) {
        None => return Err(ValidationError::MissingField(FIELD_PLACE_ID)),
        Some(value) if value.as_null().is_some() => {
            return Err(ValidationError::MissingField(FIELD_PLACE_ID))
        }
        Some(value) => value
            .as_str()
            .map(str::trim)
            .ok_or(ValidationError::NotString(FIELD_PLACE_ID))?,
    };
    if location_id.is_empty() {
        return Err(ValidationError::EmptyLocation);
    }

    let temperature = numeric_field(obj.get(FIELD_TEMPERATURE), FIELD_TEMPERATURE)?;
    let humidity = numeric_field(obj.get(FIELD_HUMIDITY), FIELD_HUMIDITY)?;

    Ok(Reading {
        location_id: location_id.to_string(),
        temperature,
        humidity,
        received_at,
    })
}

fn numeric_field(
    value: Option<&BorrowedValue<'_>>,
    field: &'static str,
) -> Result<f64, ValidationError> {
    let value = match value {
        Some(value) if value.as_null().is_none() => value,
        _ => return Err(ValidationError::MissingField(field)),
    };
    let number = value
        .as_f64()
        .or_else(|| value.as_i64().map(|v| v as f64))
        .or_else(|| value.as_u64().map(|v| v as f64))
        .ok_or(ValidationError::NotNumeric(field))?;
    if !number.is_finite() {
        return Err(ValidationError::NotFinite(field));
    }
    Ok(number)
}
