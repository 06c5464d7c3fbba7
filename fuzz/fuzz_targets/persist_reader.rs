#![no_main]
use std::io::Cursor;

use libfuzzer_sys::fuzz_target;
use rmetrics::data::{Histogram, HitCount};
use rmetrics::persist::PersistedDataReader;

// The reader must never panic on arbitrary input: every outcome is either
// a clean end-of-data, a parsed record, or a PersistedDataError.
fuzz_target!(|data: &[u8]| {
    let mut reader = PersistedDataReader::new(Cursor::new(data));

    // Scan up to a handful of records so concatenations get exercised too.
    for _ in 0..4 {
        match reader.read_data_header() {
            Ok(true) => {}
            Ok(false) | Err(_) => break,
        }

        let data_type = match reader.header() {
            Some(header) => header.data_type,
            None => break,
        };

        let result = match data_type {
            rmetrics::data::DataKind::HitCount => {
                reader.read_data(|_key, _value: HitCount| {})
            }
            rmetrics::data::DataKind::Histogram => {
                reader.read_data(|_key, _value: Histogram| {})
            }
        };
        if result.is_err() {
            break;
        }
    }
});
