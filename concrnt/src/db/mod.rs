//! Storage client and typed collection wrapper

mod mongo;

pub use mongo::{IntoIndexes, MongoClient, MongoCollection};

/// Serde bridge for optional timestamps stored as native BSON datetimes,
/// matching what `$set` writes.
pub mod optional_bson_datetime {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => bson::DateTime::from_chrono(*v).serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let value = Option::<bson::DateTime>::deserialize(deserializer)?;
        Ok(value.map(|v| v.to_chrono()))
    }
}
