//! End-to-end archive scenarios: append, iterate, extract, remove, update,
//! and the ordering and fixpoint guarantees.

use std::io::{Cursor, Seek, SeekFrom};

use anyhow::{bail, Result};
use sqz_codecs::{CompressionMethod, CompressionParams};
use sqz_core::{
    CustomContent, CustomContentEntryInput, EntryAttributes, EntryContent, EntryHeader,
    EntryInput, EntryPermissions, EntryType, Squeeze, StreamEntryOutput,
};

fn params(method: CompressionMethod, level: u8) -> CompressionParams {
    CompressionParams::new(method, level)
}

fn file_input(
    path: &str,
    content: &[u8],
    compression: CompressionParams,
) -> Box<dyn EntryInput> {
    Box::new(CustomContentEntryInput::regular(
        path,
        compression,
        content.to_vec(),
    ))
}

fn symlink_input(path: &str, target: &str) -> Box<dyn EntryInput> {
    Box::new(CustomContentEntryInput::new(
        path,
        CompressionParams::default(),
        CustomContent::String(target.to_string()),
        EntryAttributes::new(EntryType::Symlink, EntryPermissions::ALL),
    ))
}

/// Build an archive in memory from (path, content, params) triples.
fn build_archive(files: &[(&str, &[u8], CompressionParams)]) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    let mut squeeze = Squeeze::new(&mut cursor);
    let mut statuses = Vec::new();
    for (path, content, compression) in files {
        statuses.push(squeeze.will_append(file_input(path, content, *compression)));
    }
    assert!(squeeze.write().unwrap());
    for status in statuses {
        status.take().unwrap().unwrap();
    }
    cursor.into_inner()
}

fn extract_to_vec(archive: &mut Cursor<Vec<u8>>, pos: u64, header: &EntryHeader) -> Vec<u8> {
    let mut out = Vec::new();
    let mut output = StreamEntryOutput::new(&mut out);
    Squeeze::new(archive)
        .extract(pos, header, &mut output)
        .unwrap();
    out
}

// ── scenarios ──────────────────────────────────────────────────────────────

#[test]
fn empty_archive_iterates_to_nothing() {
    let mut cursor = Cursor::new(Vec::new());
    let mut squeeze = Squeeze::new(&mut cursor);
    assert!(squeeze.entries().is_empty());
    assert!(squeeze.write().unwrap(), "writing nothing succeeds");
}

#[test]
fn single_file_roundtrip_stays_small() {
    let archive = build_archive(&[(
        "a.txt",
        b"hello\n",
        params(CompressionMethod::Deflate, 1),
    )]);
    assert!(
        archive.len() <= 60,
        "tiny file should make a tiny archive, got {}",
        archive.len()
    );

    let mut cursor = Cursor::new(archive);
    let entries = Squeeze::new(&mut cursor).entries();
    assert_eq!(entries.len(), 1);
    let (pos, header) = &entries[0];
    assert_eq!(header.path, b"a.txt");
    assert_eq!(
        header.attributes.entry_type().unwrap(),
        EntryType::RegularFile
    );

    let content = extract_to_vec(&mut cursor, *pos, header);
    assert_eq!(content, b"hello\n");
}

#[test]
fn symlink_roundtrip_yields_target() {
    let mut cursor = Cursor::new(Vec::new());
    let mut squeeze = Squeeze::new(&mut cursor);
    let status = squeeze.will_append(symlink_input("lnk", "a.txt"));
    assert!(squeeze.write().unwrap());
    status.take().unwrap().unwrap();

    let entries = Squeeze::new(&mut cursor).entries();
    assert_eq!(entries.len(), 1);
    let (pos, header) = &entries[0];
    assert_eq!(header.attributes.entry_type().unwrap(), EntryType::Symlink);
    assert_eq!(header.attributes.permissions(), EntryPermissions::ALL);
    // the target is stored without a trailing NUL
    assert_eq!(header.content_size, 5);

    let target = extract_to_vec(&mut cursor, *pos, header);
    assert_eq!(target, b"a.txt");
}

#[test]
fn legacy_symlink_with_trailing_nul_is_accepted() {
    // hand-craft an entry the way the legacy writer did: target + '\0'
    let mut raw = Vec::new();
    let header = EntryHeader {
        content_size: 6,
        attributes: EntryAttributes::new(EntryType::Symlink, EntryPermissions::ALL),
        path: b"lnk".to_vec(),
        ..EntryHeader::default()
    };
    EntryHeader::encode(&mut raw, &header).unwrap();
    raw.extend_from_slice(b"a.txt\0");

    let mut cursor = Cursor::new(raw);
    let entries = Squeeze::new(&mut cursor).entries();
    let (pos, header) = &entries[0];
    let target = extract_to_vec(&mut cursor, *pos, header);
    assert_eq!(target, b"a.txt", "one trailing NUL must be trimmed");
}

#[test]
fn directory_entries_have_no_content() {
    let mut cursor = Cursor::new(Vec::new());
    let mut squeeze = Squeeze::new(&mut cursor);
    squeeze.will_append(Box::new(CustomContentEntryInput::new(
        "subdir",
        CompressionParams::default(),
        CustomContent::None,
        EntryAttributes::new(EntryType::Directory, EntryPermissions::from_bits(0o755)),
    )));
    assert!(squeeze.write().unwrap());

    let entries = Squeeze::new(&mut cursor).entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].1.content_size, 0);
    assert_eq!(
        entries[0].1.attributes.entry_type().unwrap(),
        EntryType::Directory
    );
}

#[test]
fn all_methods_roundtrip_through_an_archive() {
    let payload: Vec<u8> = (0..40_000u32)
        .map(|i| if i % 10 == 9 { b'B' } else { b'A' + (i % 3) as u8 })
        .collect();

    let mut files: Vec<(String, CompressionParams)> = vec![
        ("none.bin".into(), params(CompressionMethod::None, 0)),
    ];
    for level in [0u8, 4, 8] {
        files.push((format!("huff{level}.bin"), params(CompressionMethod::Huffman, level)));
        files.push((format!("defl{level}.bin"), params(CompressionMethod::Deflate, level)));
    }

    let triples: Vec<(&str, &[u8], CompressionParams)> = files
        .iter()
        .map(|(path, compression)| (path.as_str(), payload.as_slice(), *compression))
        .collect();
    let archive = build_archive(&triples);

    let mut cursor = Cursor::new(archive);
    let entries = Squeeze::new(&mut cursor).entries();
    assert_eq!(entries.len(), files.len());
    for (pos, header) in &entries {
        let content = extract_to_vec(&mut cursor, *pos, header);
        assert_eq!(content, payload, "entry {}", header.path_lossy());
        if header.compression.method != CompressionMethod::None {
            assert!(
                header.content_size < payload.len() as u64,
                "{} should compress",
                header.path_lossy()
            );
        }
    }
}

#[test]
fn huffman_biased_data_shrinks_in_archive() {
    let payload: Vec<u8> = (0..4096)
        .map(|i| if i % 10 == 9 { b'B' } else { b'A' })
        .collect();
    let archive = build_archive(&[(
        "biased.bin",
        payload.as_slice(),
        params(CompressionMethod::Huffman, 5),
    )]);

    let mut cursor = Cursor::new(archive);
    let entries = Squeeze::new(&mut cursor).entries();
    let (pos, header) = &entries[0];
    assert!(header.content_size < 4096);
    assert_eq!(extract_to_vec(&mut cursor, *pos, header), payload);
}

#[test]
fn entries_preserve_append_order() {
    // content sizes vary wildly, so worker completion order differs from
    // submission order; the archive must not
    let contents: Vec<Vec<u8>> = (0..12usize)
        .map(|i| {
            let len = if i % 3 == 0 { 200_000 } else { 50 * (i + 1) };
            (0..len).map(|j| ((i * 37 + j * 11) % 251) as u8).collect()
        })
        .collect();

    let mut cursor = Cursor::new(Vec::new());
    let mut squeeze = Squeeze::new(&mut cursor);
    for (i, content) in contents.iter().enumerate() {
        squeeze.will_append(file_input(
            &format!("f{i:02}"),
            content,
            params(CompressionMethod::Deflate, 2),
        ));
    }
    assert!(squeeze.write().unwrap());

    let entries = Squeeze::new(&mut cursor).entries();
    assert_eq!(entries.len(), contents.len());
    for (i, (pos, header)) in entries.iter().enumerate() {
        assert_eq!(header.path, format!("f{i:02}").as_bytes());
        assert_eq!(extract_to_vec(&mut cursor, *pos, header), contents[i]);
    }
}

#[test]
fn multi_remove_equals_fresh_build() {
    let compression = params(CompressionMethod::None, 0);
    let full = build_archive(&[
        ("f1", b"payload-01\n", compression),
        ("f2", b"payload-02\n", compression),
        ("f3", b"payload-03\n", compression),
    ]);
    let only_f2 = build_archive(&[("f2", b"payload-02\n", compression)]);

    let mut cursor = Cursor::new(full);
    let mut squeeze = Squeeze::new(&mut cursor);
    let entries = squeeze.entries();
    let statuses: Vec<_> = entries
        .iter()
        .filter(|(_, header)| header.path != b"f2")
        .map(|(pos, header)| squeeze.will_remove(*pos, header))
        .collect();
    assert!(squeeze.write().unwrap());
    for status in statuses {
        status.take().unwrap().unwrap();
    }

    assert_eq!(cursor.into_inner(), only_f2);
}

#[test]
fn batched_and_sequential_removes_agree() {
    let compression = params(CompressionMethod::Deflate, 1);
    let files: Vec<(String, Vec<u8>)> = (0..5usize)
        .map(|i| (format!("f{i}"), vec![b'a' + i as u8; 100 * (i + 1)]))
        .collect();
    let triples: Vec<(&str, &[u8], CompressionParams)> = files
        .iter()
        .map(|(path, content)| (path.as_str(), content.as_slice(), compression))
        .collect();
    let original = build_archive(&triples);

    // batch: remove f0, f2, f4 in one pass
    let mut batched = Cursor::new(original.clone());
    {
        let mut squeeze = Squeeze::new(&mut batched);
        let entries = squeeze.entries();
        for (pos, header) in &entries {
            if [&b"f0"[..], &b"f2"[..], &b"f4"[..]].contains(&header.path.as_slice()) {
                squeeze.will_remove(*pos, header);
            }
        }
        assert!(squeeze.write().unwrap());
    }

    // sequential: one remove per pass, in a different order
    let mut sequential = Cursor::new(original);
    for path in [&b"f4"[..], &b"f0"[..], &b"f2"[..]] {
        let mut squeeze = Squeeze::new(&mut sequential);
        let (pos, header) = squeeze.find(path).unwrap();
        squeeze.will_remove(pos, &header);
        assert!(squeeze.write().unwrap());
    }

    assert_eq!(batched.into_inner(), sequential.into_inner());
}

#[test]
fn update_replaces_existing_path() {
    let compression = params(CompressionMethod::Deflate, 1);
    let mut cursor = Cursor::new(build_archive(&[
        ("keep", b"unchanged", compression),
        ("swap", b"old content", compression),
    ]));

    let mut squeeze = Squeeze::new(&mut cursor);
    let status = squeeze.will_append(file_input("swap", b"new content", compression));
    assert!(squeeze.update().unwrap());
    status.take().unwrap().unwrap();

    let entries = Squeeze::new(&mut cursor).entries();
    assert_eq!(entries.len(), 2);
    // the replaced entry moved to the end
    assert_eq!(entries[0].1.path, b"keep");
    assert_eq!(entries[1].1.path, b"swap");
    let (pos, header) = &entries[1];
    assert_eq!(extract_to_vec(&mut cursor, *pos, header), b"new content");
}

#[test]
fn duplicate_pending_paths_are_both_written() {
    let compression = params(CompressionMethod::None, 0);
    let mut cursor = Cursor::new(Vec::new());
    let mut squeeze = Squeeze::new(&mut cursor);
    squeeze.will_append(file_input("dup", b"first", compression));
    squeeze.will_append(file_input("dup", b"second", compression));
    assert!(squeeze.write().unwrap());

    let entries = Squeeze::new(&mut cursor).entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(extract_to_vec(&mut cursor, entries[0].0, &entries[0].1), b"first");
    assert_eq!(extract_to_vec(&mut cursor, entries[1].0, &entries[1].1), b"second");
}

#[test]
fn iterator_fixpoint_after_rewrite() {
    let compression = params(CompressionMethod::Deflate, 3);
    let archive = build_archive(&[
        ("x/a", b"alpha alpha alpha", compression),
        ("x/b", b"beta", compression),
        ("x/c", &[7u8; 5000], compression),
    ]);

    // extract everything, rebuild, and compare the header sequences
    let mut first = Cursor::new(archive);
    let entries = Squeeze::new(&mut first).entries();
    let rebuilt_files: Vec<(String, Vec<u8>)> = entries
        .iter()
        .map(|(pos, header)| {
            (
                header.path_lossy().into_owned(),
                extract_to_vec(&mut first, *pos, header),
            )
        })
        .collect();
    let triples: Vec<(&str, &[u8], CompressionParams)> = rebuilt_files
        .iter()
        .map(|(path, content)| (path.as_str(), content.as_slice(), compression))
        .collect();
    let rebuilt = build_archive(&triples);

    let mut second = Cursor::new(rebuilt);
    let rebuilt_entries = Squeeze::new(&mut second).entries();
    assert_eq!(entries.len(), rebuilt_entries.len());
    for ((_, a), (_, b)) in entries.iter().zip(&rebuilt_entries) {
        assert_eq!(a.path, b.path);
        assert_eq!(a.content_size, b.content_size);
        assert_eq!(a.compression, b.compression);
        assert_eq!(a.attributes, b.attributes);
    }
}

// ── failure handling ───────────────────────────────────────────────────────

/// An entry input that fails to initialize.
struct BrokenEntryInput;

impl EntryInput for BrokenEntryInput {
    fn init(&mut self) -> Result<(EntryHeader, EntryContent<'_>)> {
        bail!("failed opening a file: 'missing'");
    }

    fn path(&self) -> &[u8] {
        b"missing"
    }
}

#[test]
fn failed_input_does_not_block_other_entries() {
    let compression = params(CompressionMethod::Deflate, 1);
    let mut cursor = Cursor::new(Vec::new());
    let mut squeeze = Squeeze::new(&mut cursor);

    let ok_before = squeeze.will_append(file_input("before", b"fine", compression));
    let broken = squeeze.will_append(Box::new(BrokenEntryInput));
    let ok_after = squeeze.will_append(file_input("after", b"also fine", compression));

    assert!(!squeeze.write().unwrap(), "overall result reports the failure");
    ok_before.take().unwrap().unwrap();
    assert!(broken.is_err());
    let message = broken.error_message().unwrap();
    assert!(message.contains("failed initializing entry input"), "{message}");
    ok_after.take().unwrap().unwrap();

    let entries = Squeeze::new(&mut cursor).entries();
    let paths: Vec<_> = entries.iter().map(|(_, h)| h.path.clone()).collect();
    assert_eq!(paths, vec![b"before".to_vec(), b"after".to_vec()]);
}

#[test]
fn archive_with_failed_tail_entry_stays_clean() {
    // a broken entry scheduled last must leave no partial record
    let compression = params(CompressionMethod::None, 0);
    let mut cursor = Cursor::new(Vec::new());
    let mut squeeze = Squeeze::new(&mut cursor);
    squeeze.will_append(file_input("good", b"content", compression));
    squeeze.will_append(Box::new(BrokenEntryInput));
    assert!(!squeeze.write().unwrap());

    // the stream ends exactly at the last full entry
    let end = cursor.seek(SeekFrom::End(0)).unwrap();
    let entries = Squeeze::new(&mut cursor).entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(end, entries[0].1.full_encoded_size());
}

#[test]
fn corrupt_method_byte_is_rejected_on_iteration() {
    let compression = params(CompressionMethod::None, 0);
    let mut archive = build_archive(&[("f", b"0123456789", compression)]);
    archive[12] = 0xEE; // method byte of the first header
    let mut cursor = Cursor::new(archive);
    assert!(Squeeze::new(&mut cursor).entries().is_empty());
}

#[test]
fn status_cells_report_exactly_once() {
    let compression = params(CompressionMethod::Deflate, 1);
    let mut cursor = Cursor::new(Vec::new());
    let mut squeeze = Squeeze::new(&mut cursor);
    let status = squeeze.will_append(file_input("f", b"bytes", compression));
    assert!(!status.is_set(), "nothing recorded before write");
    assert!(squeeze.write().unwrap());
    assert!(status.is_set());
    status.take().unwrap().unwrap();
    assert!(!status.is_set(), "taking empties the cell");

    // writing again with no pending work records nothing new
    let mut squeeze = Squeeze::new(&mut cursor);
    assert!(squeeze.write().unwrap());
    assert!(!status.is_set());
}
