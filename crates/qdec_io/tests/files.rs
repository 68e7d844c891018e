use qdec_common::BatchShape;
use qdec_core::ProtocolError;
use qdec_io::loader::load_b8_file;
use qdec_io::parser::load_dem_file;
use qdec_io::stream::{ShotReader, ShotWriter, write_zero_predictions};
use std::fs;
use tempfile::TempDir;

#[test]
fn unreadable_model_is_a_resource_error() {
    let dir = TempDir::new().unwrap();
    let err = load_dem_file(dir.path().join("absent.dem")).unwrap_err();
    assert!(matches!(err, ProtocolError::Resource { .. }));
}

#[test]
fn malformed_model_names_its_line() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.dem");
    fs::write(&path, "error(0.1) D0\nerror(0.1) D1 X7\n").unwrap();
    match load_dem_file(&path) {
        Err(ProtocolError::Decode(msg)) => assert!(msg.contains("line 2"), "{msg}"),
        other => panic!("expected decode error, got {other:?}"),
    }
}

#[test]
fn streamed_records_match_the_whole_file_view() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("dets.b8");
    let shape = BatchShape::new(4, 11, 0);

    // The writer packs prediction records, so give it 11 observable bits.
    let mut writer = ShotWriter::create(&path, &BatchShape::new(4, 0, 11)).unwrap();
    let shots: [&[usize]; 4] = [&[0, 10], &[], &[3, 4, 5], &[8]];
    for fired in shots {
        let mut bits = vec![false; 11];
        fired.iter().for_each(|&i| bits[i] = true);
        writer.write_bits(&bits).unwrap();
    }
    writer.finish().unwrap();
    assert_eq!(fs::metadata(&path).unwrap().len(), shape.input_len() as u64);

    let table = load_b8_file(&path, 11).unwrap();
    let mut reader = ShotReader::open(&path, &shape).unwrap();
    let mut i = 0;
    while let Some(record) = reader.next_record().unwrap() {
        assert_eq!(record, &table.as_bytes()[i * 2..i * 2 + 2]);
        assert_eq!(table.fired(i), shots[i]);
        i += 1;
    }
    reader.finish().unwrap();
    assert_eq!(i, 4);
}

#[test]
fn trailing_bytes_after_the_last_record_are_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("dets.b8");
    fs::write(&path, [1, 2, 3]).unwrap();

    let mut reader = ShotReader::open(&path, &BatchShape::new(2, 8, 1)).unwrap();
    while reader.next_record().unwrap().is_some() {}
    assert!(matches!(reader.finish(), Err(ProtocolError::Format(_))));
}

#[test]
fn zero_predictions_fill_every_record() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("obs.b8");
    write_zero_predictions(&path, &BatchShape::new(3, 0, 12)).unwrap();
    assert_eq!(fs::read(&path).unwrap(), vec![0; 6]);
}
