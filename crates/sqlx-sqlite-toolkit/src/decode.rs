//! SQLite value to JSON conversion.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value as JsonValue;
use sqlx::sqlite::SqliteValueRef;
use sqlx::{TypeInfo, Value, ValueRef};

use crate::Error;

/// Converts one SQLite value to JSON.
///
/// Dispatches on the storage class of the value itself, not the declared
/// column type: INTEGER and REAL become numbers, TEXT a string, BLOB a base64
/// string and NULL `null`. A REAL that JSON cannot represent (NaN, infinity)
/// becomes `null`.
pub fn to_json(v: SqliteValueRef<'_>) -> Result<JsonValue, Error> {
   if v.is_null() {
      return Ok(JsonValue::Null);
   }

   let type_name = v.type_info().name().to_string();
   let value = ValueRef::to_owned(&v);

   let json = match type_name.as_str() {
      "INTEGER" => JsonValue::from(value.try_decode::<i64>()?),
      "REAL" => JsonValue::from(value.try_decode::<f64>()?),
      "TEXT" => JsonValue::String(value.try_decode::<String>()?),
      "BLOB" => JsonValue::String(STANDARD.encode(value.try_decode::<Vec<u8>>()?)),
      "NULL" => JsonValue::Null,
      other => return Err(Error::UnsupportedDatatype(other.to_string())),
   };

   Ok(json)
}
