#![allow(dead_code)]
use std::env;
use std::path::PathBuf;

use xtce::model::Database;

pub fn fixture_path(name: &str) -> PathBuf {
    let dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    PathBuf::from(dir).join("tests").join("fixtures").join(name)
}

pub fn spacecraft() -> Database {
    Database::from_file(fixture_path("spacecraft.json")).unwrap()
}

/// A housekeeping packet: APID 100, time 1.5s after TAI epoch, mode NOMINAL, voltage
/// raw 5, extra 42.
pub const HOUSEKEEPING: &str = "0864c007000a 00000001800000 01052a";

pub fn hex_bytes(s: &str) -> Vec<u8> {
    hex::decode(s.replace(' ', "")).unwrap()
}
