use std::io::Write;

use flate2::write::{DeflateEncoder, GzEncoder};
use flate2::{Compression, Crc, GzBuilder};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::*;

/// Writes `data` as a blocked-gzip file: one member per `block_size` span,
/// the first carrying the block-size comment.
fn write_blocked(data: &[u8], block_size: usize) -> Vec<u8> {
    let mut file = Vec::new();
    for (i, block) in data.chunks(block_size).enumerate() {
        if i == 0 {
            let mut enc = GzBuilder::new()
                .comment(format!("HPROF BLOCKSIZE={block_size}"))
                .write(&mut file, Compression::default());
            enc.write_all(block).unwrap();
            enc.finish().unwrap();
        } else {
            let mut enc = GzEncoder::new(&mut file, Compression::default());
            enc.write_all(block).unwrap();
            enc.finish().unwrap();
        }
    }
    file
}

fn to_file(bytes: &[u8]) -> fs::File {
    let mut f = tempfile::tempfile().unwrap();
    f.write_all(bytes).unwrap();
    f
}

fn open(bytes: &[u8], config: &Config) -> BlockedGzipReader {
    BlockedGzipReader::new_with_config(to_file(bytes), config)
        .unwrap()
        .unwrap()
}

/// Reads until `len` bytes arrived or a read returned zero.
fn read_full(rdr: &BlockedGzipReader, mut pos: u64, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let n = rdr.read_at(pos, &mut out[filled..]).unwrap();
        if n == 0 {
            break;
        }
        filled += n;
        pos += n as u64;
    }
    out.truncate(filled);
    out
}

#[test]
fn random_access_matches_plain_content() {
    let mut data = vec![0u8; 300_000];
    StdRng::seed_from_u64(0x1234).fill(&mut data[..]);
    let rdr = open(&write_blocked(&data, 4096), &Config::default());
    assert_eq!(rdr.block_size(), 4096);

    let mut rng = StdRng::seed_from_u64(0x5678);
    for _ in 0..100 {
        let pos = rng.gen_range(0..data.len());
        let len = rng.gen_range(1..10_000);
        let got = read_full(&rdr, pos as u64, len);
        assert_eq!(got, data[pos..data.len().min(pos + len)]);
    }
}

#[test]
fn reads_stop_at_chunk_boundaries() {
    let data: Vec<u8> = (0..20_000u32).map(|i| i as u8).collect();
    let rdr = open(&write_blocked(&data, 1000), &Config::default());

    let mut buf = [0u8; 256];
    let n = rdr.read_at(900, &mut buf).unwrap();
    assert_eq!(n, 100);
    assert_eq!(&buf[..n], &data[900..1000]);

    let n = rdr.read_at(1000, &mut buf).unwrap();
    assert_eq!(n, 256);
    assert_eq!(&buf[..n], &data[1000..1256]);
}

#[test]
fn end_of_data_reads_zero() {
    let data = vec![7u8; 2500];
    let rdr = open(&write_blocked(&data, 1000), &Config::default());

    let mut buf = [0u8; 100];
    assert_eq!(rdr.read_at(2500, &mut buf).unwrap(), 0);
    assert_eq!(rdr.read_at(9999, &mut buf).unwrap(), 0);
    assert_eq!(rdr.read_at(2450, &mut buf).unwrap(), 50);
    assert_eq!(rdr.read_at(0, &mut []).unwrap(), 0);
}

#[test]
fn eviction_keeps_boundaries() {
    let mut data = vec![0u8; 64 * 1024];
    StdRng::seed_from_u64(7).fill(&mut data[..]);
    let config = Config::default().max_cached_buffers(2);
    let rdr = open(&write_blocked(&data, 4096), &config);

    // Walk forward to discover every member, then revisit in reverse so
    // every read but the first two hits an evicted chunk.
    assert_eq!(read_full(&rdr, 0, data.len()), data);
    for chunk in (0..16).rev() {
        let pos = chunk * 4096;
        let mut buf = [0u8; 4096];
        assert_eq!(rdr.read_at(pos as u64, &mut buf).unwrap(), 4096);
        assert_eq!(&buf[..], &data[pos..pos + 4096]);
    }

    let st = rdr.lock();
    assert_eq!(st.cache.len(), 2);
    assert_eq!(st.chunks.len(), 16);
    // The reverse walk ends on chunks 1 and 0, so exactly those two
    // offsets survive eviction.
    assert!(st.cache.contains(&0));
    assert!(st.cache.contains(&4096));
    assert!(!st.cache.contains(&(2 * 4096)));
    assert!(!st.cache.contains(&(15 * 4096)));
}

#[test]
fn single_buffer_cache_thrashes_correctly() {
    let data: Vec<u8> = (0..4000u32).map(|i| (i % 251) as u8).collect();
    let config = Config::default().max_cached_buffers(1);
    let rdr = open(&write_blocked(&data, 1000), &config);

    let mut buf = [0u8; 8];
    for _ in 0..3 {
        rdr.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf[..], &data[0..8]);
        rdr.read_at(3500, &mut buf).unwrap();
        assert_eq!(&buf[..], &data[3500..3508]);
    }
    assert_eq!(rdr.lock().cache.len(), 1);
}

#[test]
fn large_members_refill_the_input_buffer() {
    // Incompressible members well past `READ_SIZE`, and members whose
    // decompressed size fills the chunk buffer exactly.
    let mut data = vec![0u8; 400_000];
    StdRng::seed_from_u64(11).fill(&mut data[..]);
    let rdr = open(&write_blocked(&data, 200_000), &Config::default());
    assert_eq!(read_full(&rdr, 0, data.len()), data);
    assert_eq!(rdr.lock().chunks.len(), 2);
}

#[test]
fn plain_gzip_is_declined() {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(b"hello world").unwrap();
    let bytes = enc.finish().unwrap();
    assert!(BlockedGzipReader::new(to_file(&bytes)).unwrap().is_none());

    // Wrong or malformed comments are declined too.
    for comment in [
        "BLOCKSIZE=4096",
        "HPROF BLOCKSIZE=",
        "HPROF BLOCKSIZE=x",
        "HPROF BLOCKSIZE=40x6",
        "HPROF BLOCKSIZE=0",
        "hprof blocksize=4096",
    ] {
        let mut enc = GzBuilder::new()
            .comment(comment)
            .write(Vec::new(), Compression::default());
        enc.write_all(b"hello").unwrap();
        let bytes = enc.finish().unwrap();
        assert!(
            BlockedGzipReader::new(to_file(&bytes)).unwrap().is_none(),
            "{comment:?}",
        );
    }
}

#[test]
fn comment_may_carry_trailing_text() {
    let mut enc = GzBuilder::new()
        .comment("HPROF BLOCKSIZE=512 created by some tool")
        .write(Vec::new(), Compression::default());
    enc.write_all(&[1, 2, 3]).unwrap();
    let bytes = enc.finish().unwrap();

    let rdr = BlockedGzipReader::new(to_file(&bytes)).unwrap().unwrap();
    assert_eq!(rdr.block_size(), 512);
    assert_eq!(read_full(&rdr, 0, 10), [1, 2, 3]);
}

#[test]
fn non_gzip_input_is_an_error() {
    assert!(BlockedGzipReader::new(to_file(b"JAVA PROFILE 1.0.2\0")).is_err());
    assert!(BlockedGzipReader::new(to_file(&[0x1f])).is_err());
}

#[test]
fn member_headers_with_optional_fields() {
    let data: Vec<u8> = (0..156u32).map(|i| i as u8).collect();
    let mut file = Vec::new();
    let mut enc = GzBuilder::new()
        .filename("heap.bin")
        .extra(vec![9u8; 13])
        .comment("HPROF BLOCKSIZE=100")
        .write(&mut file, Compression::default());
    enc.write_all(&data[..100]).unwrap();
    enc.finish().unwrap();
    let mut enc = GzBuilder::new()
        .filename("heap.bin")
        .write(&mut file, Compression::default());
    enc.write_all(&data[100..]).unwrap();
    enc.finish().unwrap();

    let rdr = BlockedGzipReader::new(to_file(&file)).unwrap().unwrap();
    assert_eq!(read_full(&rdr, 0, 200), data);
}

#[test]
fn member_header_crc_is_skipped() {
    let payload = b"abcd";
    let mut deflate = DeflateEncoder::new(Vec::new(), Compression::default());
    deflate.write_all(payload).unwrap();
    let deflate = deflate.finish().unwrap();

    let mut file = vec![0x1f, 0x8b, 8, FLAG_HEADER_CRC | FLAG_COMMENT, 0, 0, 0, 0, 0, 255];
    file.extend_from_slice(b"HPROF BLOCKSIZE=4\0");
    file.extend_from_slice(&[0xaa, 0xbb]); // header crc, not verified
    file.extend_from_slice(&deflate);
    let mut crc = Crc::new();
    crc.update(payload);
    file.extend_from_slice(&crc.sum().to_le_bytes());
    file.extend_from_slice(&(payload.len() as u32).to_le_bytes());

    let rdr = BlockedGzipReader::new(to_file(&file)).unwrap().unwrap();
    assert_eq!(read_full(&rdr, 0, 8), *payload);
}

#[test]
fn truncated_member_returns_prefix() {
    let data = vec![3u8; 5000];
    let mut bytes = write_blocked(&data, 2000);
    bytes.truncate(bytes.len() - 10);

    let rdr = open(&bytes, &Config::default());
    let got = read_full(&rdr, 0, 5000);
    assert!(got.len() >= 4000);
    assert_eq!(got, data[..got.len()]);
}

#[test]
fn clear_cache_keeps_boundaries() {
    let mut data = vec![0u8; 10_000];
    StdRng::seed_from_u64(99).fill(&mut data[..]);
    let rdr = open(&write_blocked(&data, 1024), &Config::default());
    assert_eq!(read_full(&rdr, 0, data.len()), data);

    let boundaries = rdr.lock().chunks.len();
    rdr.clear_cache();
    {
        let st = rdr.lock();
        assert_eq!(st.cache.len(), 0);
        assert_eq!(st.chunks.len(), boundaries);
    }
    assert_eq!(read_full(&rdr, 3000, 2000), data[3000..5000]);
}

#[test]
fn approx_file_offset_tracks_member_starts() {
    let mut data = vec![0u8; 8192];
    StdRng::seed_from_u64(5).fill(&mut data[..]);
    let rdr = open(&write_blocked(&data, 1024), &Config::default());
    assert_eq!(read_full(&rdr, 0, data.len()), data);

    let (starts, compressed_len) = {
        let st = rdr.lock();
        let starts: Vec<u64> = st.chunks.iter().map(|c| c.file_offset).collect();
        (starts, st.file_len)
    };
    for (i, &start) in starts.iter().enumerate() {
        assert_eq!(rdr.approx_file_offset(i as u64 * 1024), start);
    }
    let mid = rdr.approx_file_offset(1536);
    assert!(starts[1] <= mid && mid <= starts[2]);
    assert!(rdr.approx_file_offset(u64::MAX) <= compressed_len);

    let mut prev = 0;
    for off in (0..=8192u64).step_by(128) {
        let fo = rdr.approx_file_offset(off);
        assert!(fo >= prev);
        prev = fo;
    }
}

#[test]
fn cache_buffer_cap() {
    let default = Config::default();
    // Small chunks: the byte budget dominates. Large chunks: the 1000
    // buffer floor does.
    assert_eq!(default.buffer_cap(64 * 1024).get(), 8192);
    assert_eq!(default.buffer_cap(1 << 20).get(), 1000);
    assert_eq!(Config::default().cache_size_limit(0).buffer_cap(4096).get(), 1000);
    assert_eq!(Config::default().max_cached_buffers(0).buffer_cap(4096).get(), 1);
    assert_eq!(Config::default().max_cached_buffers(3).buffer_cap(4096).get(), 3);
}

#[test]
fn frontier_and_lengths() {
    let data = vec![9u8; 3000];
    let bytes = write_blocked(&data, 1000);
    let rdr = open(&bytes, &Config::default());
    assert_eq!(rdr.compressed_len(), bytes.len() as u64);
    assert_eq!(rdr.decompressed_frontier(), 0);

    let mut buf = [0u8; 1];
    rdr.read_at(0, &mut buf).unwrap();
    assert_eq!(rdr.decompressed_frontier(), 1000);

    assert_eq!(read_full(&rdr, 0, 3000), data);
    assert_eq!(rdr.decompressed_frontier(), 3000);
}
