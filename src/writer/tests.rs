//! Integration tests for the container writer
//!
//! These build containers through the tree API, save them, and read them
//! back through a fresh open.

use crate::alloc::TableKind;
use crate::config::{ContainerOptions, SaveOptions, SectorSize};
use crate::consts::HDR_FIRST_MINIFAT_SECTOR;
use crate::error::CfbError;
use crate::file::CompoundFile;
use crate::header::Header;
use crate::stream::OpenMode;
use crate::tree::Entry;
use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use std::io::Cursor;

fn reopen(file: &mut CompoundFile<Cursor<Vec<u8>>>) -> CompoundFile<Cursor<Vec<u8>>> {
    let bytes = file.to_bytes().unwrap();
    let reopened = CompoundFile::open_bytes(bytes).unwrap();
    assert!(reopened.corruption().is_empty(), "{:?}", reopened.corruption());
    reopened
}

/// A container whose only document declares more bytes than its chain holds
fn corrupt_container() -> Vec<u8> {
    let mut file = CompoundFile::create(ContainerOptions::default());
    file.create_stream(&["Big"], &vec![0x11u8; 5000]).unwrap();
    let mut bytes = file.to_bytes().unwrap();

    // Directory is block 0; "Big" is entry 1, size field at offset 120
    let offset = 512 + 128 + 120;
    bytes[offset..offset + 4].copy_from_slice(&20000u32.to_le_bytes());
    bytes
}

#[test]
fn test_write_simple_container() {
    let mut file = CompoundFile::create(ContainerOptions::default());
    file.create_stream(&["TestStream"], b"Hello, World!").unwrap();

    let data = file.to_bytes().unwrap();
    assert!(data.len() >= 1536);
    assert_eq!(&data[0..8], b"\xD0\xCF\x11\xE0\xA1\xB1\x1A\xE1");

    let mut reopened = CompoundFile::open_bytes(data).unwrap();
    assert_eq!(reopened.open_stream(&["TestStream"]).unwrap(), b"Hello, World!");
}

#[test]
fn test_write_multiple_streams() {
    let mut file = CompoundFile::create(ContainerOptions::default());
    file.create_stream(&["Small1"], b"Small").unwrap();
    file.create_stream(&["Small2"], b"Data").unwrap();
    file.create_stream(&["Large1"], &vec![0xAAu8; 5000]).unwrap();
    file.create_stream(&["Large2"], &vec![0xBBu8; 10000]).unwrap();

    let mut reopened = reopen(&mut file);
    assert_eq!(reopened.open_stream(&["Small1"]).unwrap(), b"Small");
    assert_eq!(reopened.open_stream(&["Small2"]).unwrap(), b"Data");

    let large1 = reopened.open_stream(&["Large1"]).unwrap();
    assert_eq!(large1.len(), 5000);
    assert!(large1.iter().all(|&b| b == 0xAA));

    let large2 = reopened.open_stream(&["Large2"]).unwrap();
    assert_eq!(large2.len(), 10000);
    assert!(large2.iter().all(|&b| b == 0xBB));
}

#[test]
fn test_write_empty_stream() {
    let mut file = CompoundFile::create(ContainerOptions::default());
    file.create_stream(&["Empty"], b"").unwrap();

    let mut reopened = reopen(&mut file);
    let Entry::Document(id) = reopened.entry_by_path(&["Empty"]).unwrap() else {
        panic!("expected a document");
    };
    assert_eq!(reopened.size(id).unwrap(), 0);
    assert!(reopened.open_stream(&["Empty"]).unwrap().is_empty());
}

#[test]
fn test_nested_storage_contents() {
    let mut file = CompoundFile::create(ContainerOptions::default());
    file.create_stream(&["DirA", "Entry1"], &[12, 42, 11, 244, 135]).unwrap();

    let mut reopened = reopen(&mut file);
    assert!(reopened.entry_by_path(&["DirA"]).unwrap().is_directory());
    assert_eq!(
        reopened.open_stream(&["DirA", "Entry1"]).unwrap(),
        vec![12, 42, 11, 244, 135]
    );
    // Lookups ignore case after a round trip too
    assert_eq!(reopened.open_stream(&["dira", "ENTRY1"]).unwrap().len(), 5);
}

#[test]
fn test_duplicate_names_differing_in_case() {
    let mut file = CompoundFile::create(ContainerOptions::default());
    let root = file.root();
    file.create_document(root, "EntryA", 0).unwrap();
    assert!(matches!(
        file.create_document(root, "entrya", 0),
        Err(CfbError::DuplicateName(_))
    ));

    let reopened = reopen(&mut file);
    assert_eq!(reopened.children(reopened.root()).unwrap().len(), 1);
}

#[test]
fn test_growth_across_cutoff_is_persisted() {
    let mut file = CompoundFile::create(ContainerOptions::default());
    let id = file.create_stream(&["Growing"], &vec![1u8; 4000]).unwrap();
    {
        let mut cursor = file.open_document(id, OpenMode::ReadWrite).unwrap();
        assert_eq!(cursor.storage().unwrap(), TableKind::Mini);
        cursor.write_at(4000, &vec![2u8; 1000]).unwrap();
        assert_eq!(cursor.storage().unwrap(), TableKind::Regular);
    }

    let mut reopened = reopen(&mut file);
    let Entry::Document(id) = reopened.entry_by_path(&["Growing"]).unwrap() else {
        panic!("expected a document");
    };
    let cursor = reopened.open_document(id, OpenMode::ReadOnly).unwrap();
    assert_eq!(cursor.len().unwrap(), 5000);
    assert_eq!(cursor.storage().unwrap(), TableKind::Regular);

    let data = reopened.read_document(id).unwrap();
    assert!(data[..4000].iter().all(|&b| b == 1));
    assert!(data[4000..].iter().all(|&b| b == 2));
}

#[test]
fn test_deletion_frees_blocks_for_reuse() {
    let mut file = CompoundFile::create(ContainerOptions::default());
    file.create_stream(&["First"], &vec![1u8; 5000]).unwrap();
    let mut reopened = reopen(&mut file);

    let blocks = reopened.block_count();
    let root = reopened.root();
    reopened.delete_entry(root, "First", false).unwrap();
    reopened.create_stream(&["Second"], &vec![2u8; 5000]).unwrap();
    assert_eq!(reopened.block_count(), blocks);

    let mut saved = reopen(&mut reopened);
    assert!(!saved.exists(&["First"]));
    assert_eq!(saved.open_stream(&["Second"]).unwrap(), vec![2u8; 5000]);
}

#[test]
fn test_resave_is_byte_identical() {
    let mut file = CompoundFile::create(ContainerOptions::default());
    file.create_stream(&["WordDocument"], &vec![3u8; 9000]).unwrap();
    file.create_stream(&["1Table"], &vec![4u8; 300]).unwrap();
    file.create_stream(&["ObjectPool", "Inner"], b"inner").unwrap();

    let first = file.to_bytes().unwrap();
    let mut reopened = CompoundFile::open_bytes(first.clone()).unwrap();
    let second = reopened.to_bytes().unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_v4_container() {
    let mut file = CompoundFile::create(ContainerOptions::v4());
    file.create_stream(&["Small"], b"tiny").unwrap();
    file.create_stream(&["Large"], &vec![9u8; 10000]).unwrap();

    let bytes = file.to_bytes().unwrap();
    assert_eq!(bytes.len() % 4096, 0);
    assert_eq!(&bytes[0x1A..0x1C], &4u16.to_le_bytes());

    let mut reopened = CompoundFile::open_bytes(bytes).unwrap();
    assert_eq!(reopened.sector_size(), SectorSize::V4);
    assert_eq!(reopened.open_stream(&["Small"]).unwrap(), b"tiny");
    assert_eq!(reopened.open_stream(&["Large"]).unwrap(), vec![9u8; 10000]);
}

#[test]
fn test_difat_for_large_containers() {
    // More than 109 FAT sectors of 128 entries each
    let data: Vec<u8> = (0..7_200_000u32).map(|i| (i % 251) as u8).collect();
    let mut file = CompoundFile::create(ContainerOptions::default());
    file.create_stream(&["Huge"], &data).unwrap();

    let bytes = file.to_bytes().unwrap();
    let num_difat_sectors = u32::from_le_bytes(bytes[0x48..0x4C].try_into().unwrap());
    assert!(num_difat_sectors >= 1);

    let mut reopened = CompoundFile::open_bytes(bytes).unwrap();
    assert!(reopened.corruption().is_empty());
    assert_eq!(reopened.open_stream(&["Huge"]).unwrap(), data);
}

/// Byte offset of directory entry `index` in a saved container
fn entry_offset(bytes: &[u8], index: usize) -> usize {
    let header = Header::parse(&bytes[..512]).unwrap();
    (header.first_dir_sector as usize + 1) * header.sector_size.bytes() + index * 128
}

fn strict() -> ContainerOptions {
    ContainerOptions {
        strict: true,
        ..ContainerOptions::default()
    }
}

#[test]
fn test_open_survives_sibling_cycle() {
    let mut file = CompoundFile::create(ContainerOptions::default());
    file.create_stream(&["A"], b"a-data").unwrap();
    file.create_stream(&["B"], b"b-data").unwrap();
    let mut bytes = file.to_bytes().unwrap();

    // Entry 2 ("B") is the subtree root and links left to entry 1 ("A").
    // Rename "A" to clash with "B" and point its left link at itself.
    let a = entry_offset(&bytes, 1);
    bytes[a] = b'b';
    bytes[a + 68..a + 72].copy_from_slice(&1u32.to_le_bytes());

    let mut damaged = CompoundFile::open_bytes(bytes.clone()).unwrap();
    assert_eq!(damaged.corruption().len(), 2, "{:?}", damaged.corruption());
    assert_eq!(damaged.list_streams().unwrap(), vec![vec!["B".to_string()]]);
    assert_eq!(damaged.open_stream(&["B"]).unwrap(), b"b-data");

    assert!(matches!(
        CompoundFile::open_with(Cursor::new(bytes), strict()),
        Err(CfbError::CorruptContainer(_))
    ));
}

#[test]
fn test_oversized_declared_length() {
    let mut file = CompoundFile::create(ContainerOptions::v4());
    file.create_stream(&["Big"], &vec![0x22u8; 5000]).unwrap();
    let mut bytes = file.to_bytes().unwrap();

    let big = entry_offset(&bytes, 1);
    bytes[big + 120..big + 128].copy_from_slice(&(1u64 << 62).to_le_bytes());

    let mut damaged = CompoundFile::open_bytes(bytes).unwrap();
    assert!(!damaged.corruption().is_empty());
    assert!(matches!(
        damaged.open_stream(&["Big"]),
        Err(CfbError::CorruptChain { .. })
    ));
    let Entry::Document(doc) = damaged.entry_by_path(&["Big"]).unwrap() else {
        panic!("expected a document");
    };
    assert!(
        damaged
            .open_document(doc, OpenMode::ReadOnly)
            .unwrap()
            .read_at(0, 16)
            .unwrap_err()
            .is_corruption()
    );

    let mut out = Vec::new();
    damaged
        .write_to_with(&mut out, SaveOptions { allow_corrupt: true })
        .unwrap();
    let mut repaired = CompoundFile::open_bytes(out).unwrap();
    assert!(repaired.corruption().is_empty());
    assert_eq!(repaired.sector_size(), SectorSize::V4);
    assert!(repaired.open_stream(&["Big"]).unwrap().is_empty());
}

#[test]
fn test_looping_directory_chain_fails_open() {
    let mut file = CompoundFile::create(ContainerOptions::default());
    file.create_stream(&["S"], &[3u8; 100]).unwrap();
    let mut bytes = file.to_bytes().unwrap();

    let header = Header::parse(&bytes[..512]).unwrap();
    let dir = header.first_dir_sector as usize;
    let fat_entry = (header.difat[0] as usize + 1) * 512 + dir * 4;
    bytes[fat_entry..fat_entry + 4].copy_from_slice(&(dir as u32).to_le_bytes());

    assert!(matches!(
        CompoundFile::open_bytes(bytes),
        Err(CfbError::CorruptChain { .. })
    ));
}

#[test]
fn test_mini_fat_overlapping_directory() {
    let mut file = CompoundFile::create(ContainerOptions::default());
    file.create_stream(&["S"], &[3u8; 100]).unwrap();
    let mut bytes = file.to_bytes().unwrap();

    let dir = Header::parse(&bytes[..512]).unwrap().first_dir_sector;
    bytes[HDR_FIRST_MINIFAT_SECTOR..HDR_FIRST_MINIFAT_SECTOR + 4]
        .copy_from_slice(&dir.to_le_bytes());

    let mut damaged = CompoundFile::open_bytes(bytes.clone()).unwrap();
    assert!(
        damaged
            .corruption()
            .iter()
            .any(|problem| problem.contains("Mini-FAT"))
    );
    assert!(damaged.open_stream(&["S"]).unwrap_err().is_corruption());
    assert!(matches!(
        CompoundFile::open_with(Cursor::new(bytes), strict()),
        Err(CfbError::CorruptContainer(_))
    ));
}

#[test]
fn test_document_overlapping_directory() {
    let mut file = CompoundFile::create(ContainerOptions::default());
    file.create_stream(&["Big"], &vec![0x33u8; 5000]).unwrap();
    let mut bytes = file.to_bytes().unwrap();

    let dir = Header::parse(&bytes[..512]).unwrap().first_dir_sector;
    let big = entry_offset(&bytes, 1);
    bytes[big + 116..big + 120].copy_from_slice(&dir.to_le_bytes());

    let mut damaged = CompoundFile::open_bytes(bytes).unwrap();
    assert!(
        damaged
            .corruption()
            .iter()
            .any(|problem| problem.contains("shares or overruns"))
    );
    assert!(damaged.open_stream(&["Big"]).unwrap_err().is_corruption());
}

#[test]
fn test_corrupt_container_save_requires_override() {
    let mut file = CompoundFile::open_bytes(corrupt_container()).unwrap();
    assert!(!file.corruption().is_empty());
    assert!(file.open_stream(&["Big"]).unwrap_err().is_corruption());

    assert!(matches!(file.to_bytes(), Err(CfbError::CorruptContainer(_))));

    let mut out = Vec::new();
    file.write_to_with(&mut out, SaveOptions { allow_corrupt: true })
        .unwrap();
    let mut repaired = CompoundFile::open_bytes(out).unwrap();
    assert!(repaired.corruption().is_empty());
    assert!(repaired.open_stream(&["Big"]).unwrap().is_empty());
}

#[test]
fn test_strict_open_fails_on_corruption() {
    let options = ContainerOptions {
        strict: true,
        ..ContainerOptions::default()
    };
    match CompoundFile::open_with(Cursor::new(corrupt_container()), options) {
        Err(CfbError::CorruptContainer(problems)) => assert!(!problems.is_empty()),
        other => panic!("expected CorruptContainer, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_metadata_roundtrip() {
    let clsid = [
        0x06, 0x09, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0xC0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x46,
    ];
    let created = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let modified = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();

    let mut file = CompoundFile::create(ContainerOptions::default());
    let root = file.root();
    file.set_clsid(root, clsid).unwrap();
    let dir = file.create_directory(root, "Storage").unwrap();
    file.set_state_bits(dir, 0x55).unwrap();
    file.set_created(dir, created).unwrap();
    file.set_modified(dir, modified).unwrap();

    let reopened = reopen(&mut file);
    let root = reopened.root();
    assert_eq!(reopened.clsid(root).unwrap(), clsid);

    let Entry::Directory(dir) = reopened.entry(root, "Storage").unwrap() else {
        panic!("expected a directory");
    };
    assert_eq!(reopened.state_bits(dir).unwrap(), 0x55);
    assert_eq!(reopened.created(dir).unwrap(), Some(created));
    assert_eq!(reopened.modified(dir).unwrap(), Some(modified));
}

#[test]
fn test_save_and_open_path() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("container.cfb");

    let mut file = CompoundFile::create(ContainerOptions::default());
    file.create_stream(&["Storage", "Data"], b"on disk").unwrap();
    file.save(&path).unwrap();

    let mut reopened = CompoundFile::open_path(&path).unwrap();
    assert_eq!(reopened.open_stream(&["Storage", "Data"]).unwrap(), b"on disk");
    assert_eq!(reopened.list_streams().unwrap(), vec![vec!["Storage", "Data"]]);
}

fn streams_strategy() -> impl Strategy<Value = std::collections::BTreeMap<String, Vec<u8>>> {
    prop::collection::btree_map(
        "[A-Z][A-Z0-9]{0,10}",
        prop::collection::vec(any::<u8>(), 0..6000),
        1..8,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_streams_survive_roundtrip(streams in streams_strategy()) {
        let mut file = CompoundFile::create(ContainerOptions::default());
        for (name, data) in &streams {
            file.create_stream(&[name.as_str()], data).unwrap();
        }

        let bytes = file.to_bytes().unwrap();
        let mut reopened = CompoundFile::open_bytes(bytes).unwrap();
        prop_assert!(reopened.corruption().is_empty());
        for (name, data) in &streams {
            prop_assert_eq!(&reopened.open_stream(&[name.as_str()]).unwrap(), data);
        }
    }
}
