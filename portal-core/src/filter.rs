//! Ingest filter stage.

use crate::record::{RawRecord, Record};

pub const REQUIRED_SPECIES: &str = "Human";
pub const REQUIRED_STATUS: &str = "Alive";
/// Literal, case-sensitive prefix. "Earth(" and "earth (" do not match.
pub const EARTH_ORIGIN_PREFIX: &str = "Earth (";

/// Returns true iff the record is a living human from an Earth dimension.
pub fn keep(record: &RawRecord) -> bool {
    record.species == REQUIRED_SPECIES
        && record.status == REQUIRED_STATUS
        && record.origin.name.starts_with(EARTH_ORIGIN_PREFIX)
}

/// Apply [`keep`] and project the survivors into persisted records.
pub fn filter_records<'a, I>(raw: I) -> Vec<Record>
where
    I: IntoIterator<Item = &'a RawRecord>,
{
    raw.into_iter()
        .filter(|r| keep(r))
        .map(Record::from_raw)
        .collect()
}
