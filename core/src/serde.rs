/// Serde helper to (de)serialize `Option<DateTime<Utc>>` as seconds since
/// the ledger epoch (2000-01-01T00:00:00Z).
pub mod ledger_time {
    use chrono::{DateTime, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    use crate::transaction::{from_ledger_time, to_ledger_time};

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(time) => {
                let secs = to_ledger_time(*time).ok_or_else(|| {
                    serde::ser::Error::custom(format!("{time} is outside the ledger time range"))
                })?;
                s.serialize_some(&secs)
            }
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(d: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<u32>::deserialize(d)?
            .map(|secs| from_ledger_time(secs).ok_or_else(|| de::Error::custom("bad ledger time")))
            .transpose()
    }
}
