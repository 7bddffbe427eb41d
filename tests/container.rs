mod common;

use common::{hex_bytes, spacecraft, HOUSEKEEPING};
use xtce::content::{ContainerProcessor, ContentEntry, ContentKind, ResolverOptions};
use xtce::entry_value::EntryValue;
use xtce::Error;

const HEADER: [&str; 7] = ["Version", "Type", "SecHdr", "Apid", "SeqFlags", "SeqCount", "Length"];

fn data_names<'a>(entries: &'a [ContentEntry]) -> Vec<&'a str> {
    entries
        .iter()
        .filter(|e| e.kind() == ContentKind::Parameter)
        .map(ContentEntry::name)
        .collect()
}

#[test]
fn inherits_base_entries_in_order() {
    let db = spacecraft();
    let model = ContainerProcessor::new(&db)
        .process_container(db.container("/Spacecraft/Bare").unwrap(), &[], None)
        .unwrap();

    assert_eq!(data_names(model.entries()), HEADER);
    let starts: Vec<Option<u64>> = model
        .entries()
        .iter()
        .filter(|e| e.kind() == ContentKind::Parameter)
        .map(ContentEntry::start_bit)
        .collect();
    assert_eq!(
        starts,
        [Some(0), Some(3), Some(4), Some(5), Some(16), Some(18), Some(32)]
    );
    assert_eq!(model.total_size(), 48);
    assert!(model.is_valid());
}

#[test]
fn layout_without_binary() {
    let db = spacecraft();
    let model = ContainerProcessor::new(&db)
        .process_container(db.container("/Spacecraft/Housekeeping").unwrap(), &[], None)
        .unwrap();

    let apid = model.find("Apid").next().unwrap();
    assert_eq!(apid.value().unwrap().value(), "100");
    assert_eq!(model.find("Timestamp").next().unwrap().start_bit(), Some(48));
    assert_eq!(model.find("Mode").next().unwrap().start_bit(), Some(104));
    assert_eq!(model.find("Voltage").next().unwrap().start_bit(), Some(112));

    // Mode is never bound, so Extra is not in use
    let extra = model.find("Extra").next().unwrap();
    assert!(!extra.is_in_use());
    assert_eq!(extra.start_bit(), None);
    assert_eq!(model.total_size(), 120);
}

#[test]
fn user_value_enables_condition() {
    let db = spacecraft();
    let mode = db.parameter("/Spacecraft/Mode").unwrap();
    let values = [EntryValue::calibrated(mode, "NOMINAL")];
    let model = ContainerProcessor::new(&db)
        .process_container(db.container("/Spacecraft/Housekeeping").unwrap(), &values, None)
        .unwrap();

    let extra = model.find("Extra").next().unwrap();
    assert!(extra.is_in_use());
    assert_eq!(extra.start_bit(), Some(120));
    assert_eq!(model.total_size(), 128);
}

#[test]
fn decode_housekeeping() {
    let db = spacecraft();
    let buf = hex_bytes(HOUSEKEEPING);
    let model = ContainerProcessor::new(&db)
        .process_container(db.container("/Spacecraft/Housekeeping").unwrap(), &[], Some(&buf))
        .unwrap();
    assert!(model.is_valid(), "{:?}", model.warnings());
    assert!(model.warnings().is_empty(), "{:?}", model.warnings());

    let value = |name| model.find(name).next().unwrap().value().unwrap().value().to_string();
    assert_eq!(value("SecHdr"), "1");
    assert_eq!(value("Apid"), "100");
    assert_eq!(value("SeqFlags"), "3");
    assert_eq!(value("SeqCount"), "7");
    assert_eq!(value("Length"), "10");
    assert_eq!(value("Timestamp"), "1958-01-01T00:00:01.500");
    assert_eq!(value("Mode"), "NOMINAL");
    assert_eq!(value("Voltage"), "13");
    assert_eq!(value("Extra"), "42");

    let voltage = model.find("Voltage").next().unwrap().value().unwrap();
    assert_eq!(voltage.uncalibrated_value(), Some("5"));
    assert_eq!(model.total_size(), 128);
}

#[test]
fn encode_reproduces_decoded_buffer() {
    let db = spacecraft();
    let buf = hex_bytes(HOUSEKEEPING);
    let model = ContainerProcessor::new(&db)
        .process_container(db.container("/Spacecraft/Housekeeping").unwrap(), &[], Some(&buf))
        .unwrap();
    let encoded = model.encode();
    assert!(encoded.is_clean(), "{:?}", encoded.warnings);
    assert_eq!(encoded.value, buf);
}

#[test]
fn restriction_conflict_invalidates_model() {
    let db = spacecraft();
    let mut buf = hex_bytes(HOUSEKEEPING);
    buf[1] = 0x65; // APID 101
    let model = ContainerProcessor::new(&db)
        .process_container(db.container("/Spacecraft/Housekeeping").unwrap(), &[], Some(&buf))
        .unwrap();
    assert!(!model.is_valid());
    assert!(
        model.warnings().iter().any(|w| w.contains("Apid")),
        "{:?}",
        model.warnings()
    );
}

#[test]
fn dynamic_repeat() {
    let db = spacecraft();
    let buf = hex_bytes("08c8c0000003 03 0a141e");
    let model = ContainerProcessor::new(&db)
        .process_container(db.container("/Spacecraft/Samples").unwrap(), &[], Some(&buf))
        .unwrap();

    let samples: Vec<&ContentEntry> = model.find("Sample").collect();
    assert_eq!(samples.len(), 3);
    let starts: Vec<u64> = samples.iter().filter_map(|s| s.start_bit()).collect();
    assert_eq!(starts, [56, 64, 72]);
    let labels: Vec<&str> = samples.iter().map(|s| s.repeat_label()).collect();
    assert_eq!(labels, ["Repeat 1 of 3", "Repeat 2 of 3", "Repeat 3 of 3"]);
    let values: Vec<&str> = samples.iter().map(|s| s.value().unwrap().value()).collect();
    assert_eq!(values, ["10", "20", "30"]);
    assert!(model.warnings().is_empty(), "{:?}", model.warnings());
    assert_eq!(model.total_size(), 80);
}

#[test]
fn repeat_count_unavailable() {
    let db = spacecraft();
    let model = ContainerProcessor::new(&db)
        .process_container(db.container("/Spacecraft/Samples").unwrap(), &[], None)
        .unwrap();
    assert_eq!(model.find("Sample").count(), 1);
    assert!(model.warnings()[0].contains("repeat count"));
}

#[test]
fn overlap_is_a_warning() {
    let db = spacecraft();
    let model = ContainerProcessor::new(&db)
        .process_container(db.container("/Spacecraft/Overlapping").unwrap(), &[], None)
        .unwrap();
    assert_eq!(model.warnings(), ["Sample overlaps Count at bits 4-7"]);
    assert!(model.is_valid());
    assert_eq!(model.total_size(), 12);
}

#[test]
fn short_buffer() {
    let db = spacecraft();
    let buf = hex_bytes("0864c007000a0000");
    let err = ContainerProcessor::new(&db)
        .process_container(db.container("/Spacecraft/Housekeeping").unwrap(), &[], Some(&buf))
        .unwrap_err();
    match err {
        Error::NotEnoughData {
            item,
            start_bit,
            size,
            available,
        } => {
            assert_eq!(item, "Timestamp");
            assert_eq!((start_bit, size, available), (48, 56, 64));
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn show_all_conditions() {
    let db = spacecraft();
    let options = ResolverOptions::builder().show_all_conditions(true).build();
    let processor = ContainerProcessor::with_options(&db, options);
    let model = processor
        .process_container(db.container("/Spacecraft/Housekeeping").unwrap(), &[], None)
        .unwrap();
    assert!(!model.find("Extra").next().unwrap().is_in_use());
    assert!(processor.options().show_all_conditions);
}

const STATUS: &str = "092cc0000004 01 05 1c02";

#[test]
fn nested_container_with_aggregate() {
    let db = spacecraft();
    let buf = hex_bytes(STATUS);
    let model = ContainerProcessor::new(&db)
        .process_container(db.container("/Spacecraft/Status").unwrap(), &[], Some(&buf))
        .unwrap();

    assert!(model.is_valid(), "{:?}", model.warnings());
    assert!(model.warnings().is_empty(), "{:?}", model.warnings());
    let block = model.find("PowerBlock").next().unwrap();
    assert_eq!(block.kind(), ContentKind::Container);
    assert_eq!(block.start_bit(), None);

    let placed: Vec<(&str, Option<u64>)> = model.entries()[model.entries().len() - 5..]
        .iter()
        .map(|e| (e.name(), e.start_bit()))
        .collect();
    assert_eq!(
        placed,
        [
            ("PowerBlock", None),
            ("Voltage", Some(56)),
            ("Power", None),
            ("Power.bus", Some(64)),
            ("Power.load", Some(72)),
        ]
    );
    assert_eq!(model.find("Voltage").next().unwrap().value().unwrap().value(), "13");
    assert_eq!(model.find("Power.bus").next().unwrap().value().unwrap().value(), "28");
    assert_eq!(model.total_size(), 80);
}

#[test]
fn nested_aggregate_condition() {
    let db = spacecraft();
    let status = db.container("/Spacecraft/Status").unwrap();
    let safe = hex_bytes("092cc0000004 00 05");

    let model = ContainerProcessor::new(&db)
        .process_container(status, &[], Some(&safe))
        .unwrap();
    let power = model.find("Power").next().unwrap();
    assert!(!power.is_in_use());
    assert_eq!(model.find("Power.bus").count(), 0);
    assert_eq!(model.total_size(), 64);

    let options = ResolverOptions::builder().show_all_conditions(true).build();
    let model = ContainerProcessor::with_options(&db, options)
        .process_container(status, &[], Some(&safe))
        .unwrap();
    for name in ["Power.bus", "Power.load"] {
        let member = model.find(name).next().unwrap();
        assert!(!member.is_in_use(), "{name}");
        assert_eq!(member.start_bit(), None, "{name}");
    }
    assert_eq!(model.total_size(), 64);
}

#[test]
fn decode_all() {
    let db = spacecraft();
    let buffers: Vec<Vec<u8>> = (0u8..8)
        .map(|count| {
            let mut buf = hex_bytes("08c8c0000003");
            buf.push(count);
            buf.extend(std::iter::repeat(count).take(count as usize));
            buf
        })
        .collect();
    let models = ContainerProcessor::new(&db)
        .decode_all(db.container("/Spacecraft/Samples").unwrap(), &buffers);

    assert_eq!(models.len(), buffers.len());
    for (count, model) in models.iter().enumerate() {
        let model = model.as_ref().unwrap();
        assert_eq!(model.find("Sample").count(), count);
        assert_eq!(model.total_size(), 56 + 8 * count as u64);
    }
}

#[test]
fn json_rows() {
    let db = spacecraft();
    let buf = hex_bytes(HOUSEKEEPING);
    let model = ContainerProcessor::new(&db)
        .process_container(db.container("/Spacecraft/Housekeeping").unwrap(), &[], Some(&buf))
        .unwrap();

    let json: serde_json::Value = serde_json::from_str(&model.to_json().unwrap()).unwrap();
    let rows = json.as_array().unwrap();
    assert_eq!(rows.len(), model.entries().len());

    let mode = rows.iter().find(|r| r["name"] == "Mode").unwrap();
    assert_eq!(mode["path"], "/Spacecraft/Mode");
    assert_eq!(mode["kind"], "Parameter");
    assert_eq!(mode["startBit"], 104);
    assert_eq!(mode["sizeInBits"], 8);
    assert_eq!(mode["value"], "NOMINAL");
    assert_eq!(mode["uncalibratedValue"], "1");
    assert_eq!(mode["rawValue"], "0x01");
    assert_eq!(mode["inUse"], true);

    let table = model.to_string();
    assert!(table.starts_with("Housekeeping (128 bits)"));
    assert!(table.contains("NOMINAL"));
}
