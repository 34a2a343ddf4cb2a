/// Integration tests: decode and encode sessions driven against the
/// in-process reference engine.
///
/// Each test writes its own file under the system temp directory, encodes
/// deterministic PCM into it, then reopens it through a `DecodeSession`.
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Arc;

use ape_core::tag::{read_tag, remove_tag, tag_file};
use ape_core::{
    CompressionLevel, DecodeSession, EncodeOptions, EncodeSession, EncodeState, Engine, Error,
    InfoField, InfoValue, TagFields, WaveFormat,
};
use ape_engines::ReferenceEngine;

const CD: WaveFormat = WaveFormat::new(44100, 16, 2);

/// Generate `len` deterministic bytes using a simple LCG.
fn pseudo_random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = seed;
    (0..len)
        .map(|_| {
            rng = rng
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (rng >> 56) as u8
        })
        .collect()
}

/// 16-bit sawtooth, compressible enough for the codecs to kick in.
fn sawtooth_pcm(blocks: usize, channels: usize) -> Vec<u8> {
    (0..blocks * channels)
        .flat_map(|i| ((((i / channels) % 200) as i16 - 100) * 150).to_le_bytes())
        .collect()
}

// ── helpers ───────────────────────────────────────────────────────────────

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("ape_test_{}_{}.ape", std::process::id(), name))
}

fn engine_with_frames(frame_blocks: u32) -> (Arc<ReferenceEngine>, Arc<dyn Engine>) {
    let reference = Arc::new(ReferenceEngine::with_frame_blocks(frame_blocks));
    let engine: Arc<dyn Engine> = reference.clone();
    (reference, engine)
}

fn encode(engine: &Arc<dyn Engine>, path: &PathBuf, options: &EncodeOptions, pcm: &[u8]) {
    let mut session = EncodeSession::create(engine.clone(), path, options).unwrap();
    session.write(pcm).unwrap();
    session.finish(&[], 0).unwrap();
}

fn read_all_in_chunks(session: &mut DecodeSession, chunk: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; chunk];
    loop {
        let n = session.read(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        assert!(n <= chunk);
        out.extend_from_slice(&buf[..n]);
    }
    out
}

// ── tests ──────────────────────────────────────────────────────────────────

/// 44.1 kHz stereo 16-bit, 1000 blocks: 4000 bytes, seek to the middle,
/// then one full read from the start.
#[test]
fn test_cd_stream_length_seek_and_read() {
    let (reference, engine) = engine_with_frames(73_728);
    let path = temp_path("cd_scenario");
    let pcm = pseudo_random_bytes(4000, 0xC0FFEE);
    encode(&engine, &path, &EncodeOptions::new(CD), &pcm);

    let mut session = DecodeSession::open(engine.clone(), &path).unwrap();
    assert_eq!(session.block_align(), 4);
    assert_eq!(session.total_blocks(), 1000);
    assert_eq!(session.length(), 4000);

    assert_eq!(session.seek(SeekFrom::Start(2000)).unwrap(), 2000);
    assert_eq!(session.position().unwrap(), 2000);

    session.seek(SeekFrom::Start(0)).unwrap();
    let mut buf = vec![0u8; 4000];
    assert_eq!(session.read(&mut buf).unwrap(), 4000);
    assert_eq!(buf, pcm);
    assert_eq!(session.read(&mut buf).unwrap(), 0);

    drop(session);
    assert_eq!(reference.live_handles(), 0);
}

#[test]
fn test_any_chunk_size_reads_whole_stream() {
    // 24-bit stereo: 6-byte blocks, several short frames
    let format = WaveFormat::new(48000, 24, 2);
    let (_, engine) = engine_with_frames(100);
    let path = temp_path("chunk_sizes");
    let pcm = pseudo_random_bytes(1234 * 6, 42);
    encode(&engine, &path, &EncodeOptions::new(format), &pcm);

    for chunk in [1, 5, 6, 7, 13, 600, 4096, 8000] {
        let mut session = DecodeSession::open(engine.clone(), &path).unwrap();
        let out = read_all_in_chunks(&mut session, chunk);
        assert_eq!(out.len() as u64, session.length(), "chunk size {chunk}");
        assert_eq!(out, pcm, "chunk size {chunk} should reproduce the stream");
    }
}

#[test]
fn test_narrow_reads_track_exact_position() {
    let (_, engine) = engine_with_frames(64);
    let path = temp_path("narrow_position");
    let pcm = pseudo_random_bytes(400, 7);
    encode(&engine, &path, &EncodeOptions::new(CD), &pcm);

    let mut session = DecodeSession::open(engine, &path).unwrap();
    let mut three = [0u8; 3];
    session.read_exact(&mut three).unwrap();
    assert_eq!(&three, &pcm[..3]);
    assert_eq!(session.position().unwrap(), 3);

    session.read_exact(&mut three).unwrap();
    assert_eq!(&three, &pcm[3..6]);
    assert_eq!(session.position().unwrap(), 6);

    // Seeking drops the partly handed-out block
    session.seek(SeekFrom::Start(8)).unwrap();
    session.read_exact(&mut three).unwrap();
    assert_eq!(&three, &pcm[8..11]);
}

#[test]
fn test_seek_floors_to_block_and_is_stable() {
    let (_, engine) = engine_with_frames(256);
    let path = temp_path("floor_seek");
    encode(&engine, &path, &EncodeOptions::new(CD), &sawtooth_pcm(1000, 2));

    let mut session = DecodeSession::open(engine, &path).unwrap();
    let length = session.length();
    for offset in [0, 1, 3, 4, 5, 1023, 1024, 2001, 3999, length] {
        let landed = session.seek_bytes(offset).unwrap();
        assert!(landed <= offset, "seek({offset}) landed past target at {landed}");
        assert!(offset - landed < 4, "seek({offset}) landed more than a block early");
        assert_eq!(session.position().unwrap(), landed);
        assert_eq!(session.position().unwrap(), landed, "position must be stable");
    }

    assert_eq!(session.seek(SeekFrom::End(0)).unwrap(), length);
    assert_eq!(session.seek(SeekFrom::Current(-6)).unwrap(), length - 8);
    let err = session.seek(SeekFrom::Current(-(length as i64) - 1)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[test]
fn test_seek_by_time() {
    let (_, engine) = engine_with_frames(1024);
    let path = temp_path("seek_ms");
    encode(&engine, &path, &EncodeOptions::new(CD), &sawtooth_pcm(44100, 2));

    let mut session = DecodeSession::open(engine, &path).unwrap();
    assert_eq!(session.seek_ms(10).unwrap(), 441 * 4);
    assert_eq!(session.current_block().unwrap(), 441);
    assert_eq!(session.info_int(InfoField::CurrentMs).unwrap(), 10);

    // Far past the end, including times whose block count overflows u64
    let length = session.length();
    assert_eq!(session.seek_ms(3_600_000).unwrap(), length);
    assert_eq!(session.seek_ms(u64::MAX).unwrap(), length);
    assert_eq!(session.read(&mut [0u8; 16]).unwrap(), 0);
}

#[test]
fn test_read_past_end_returns_zero() {
    let (_, engine) = engine_with_frames(128);
    let path = temp_path("past_end");
    encode(&engine, &path, &EncodeOptions::new(CD), &sawtooth_pcm(300, 2));

    let mut session = DecodeSession::open(engine, &path).unwrap();
    session.seek(SeekFrom::End(0)).unwrap();
    let mut buf = [0u8; 64];
    assert_eq!(session.read(&mut buf).unwrap(), 0);
    assert_eq!(session.read(&mut buf).unwrap(), 0);
    assert_eq!(session.position().unwrap(), session.length());
}

#[test]
fn test_roundtrip_copy_in() {
    let format = WaveFormat::new(22050, 16, 1);
    let (_, engine) = engine_with_frames(512);
    let path = temp_path("roundtrip_write");
    let pcm = sawtooth_pcm(5000, 1);

    let options = EncodeOptions::new(format).with_level(CompressionLevel::High);
    let mut session = EncodeSession::create(engine.clone(), &path, &options).unwrap();
    for piece in pcm.chunks(777) {
        session.write(piece).unwrap();
    }
    assert_eq!(session.bytes_submitted(), pcm.len() as u64);
    session.finish(&[], 0).unwrap();
    assert_eq!(session.state(), EncodeState::Finished);

    let mut decoder = DecodeSession::open(engine, &path).unwrap();
    assert_eq!(decoder.format(), format);
    assert_eq!(decoder.total_blocks(), 5000);
    assert_eq!(decoder.info_int(InfoField::CompressionLevel).unwrap(), 3000);
    assert_eq!(read_all_in_chunks(&mut decoder, 4096), pcm);
}

#[test]
fn test_roundtrip_locked_buffer() {
    let (reference, engine) = engine_with_frames(64);
    let path = temp_path("roundtrip_locked");
    let pcm = pseudo_random_bytes(64 * 4 * 10 + 36, 99);

    let options = EncodeOptions::new(CD).with_level(CompressionLevel::Fast);
    let mut session = EncodeSession::create(engine.clone(), &path, &options).unwrap();
    assert_eq!(session.write_locked(&pcm).unwrap(), pcm.len());
    // io::Write goes through the same path
    session.write_all(&pcm[..400]).unwrap();
    session.finish(&[], 0).unwrap();
    drop(session);

    let mut expected = pcm.clone();
    expected.extend_from_slice(&pcm[..400]);

    let mut decoder = DecodeSession::open(engine, &path).unwrap();
    assert_eq!(decoder.total_blocks(), expected.len() as u64 / 4);
    assert_eq!(read_all_in_chunks(&mut decoder, 1000), expected);
    drop(decoder);
    assert_eq!(reference.live_handles(), 0);
}

#[test]
fn test_lease_commit_bounds() {
    let (_, engine) = engine_with_frames(32);
    let path = temp_path("lease_bounds");
    let mut session = EncodeSession::create(engine.clone(), &path, &EncodeOptions::new(CD)).unwrap();

    let mut lease = session.lock_buffer().unwrap();
    let capacity = lease.capacity();
    assert!(capacity > 1);
    let fill = pseudo_random_bytes(capacity, 5);
    lease.as_mut_slice()[..capacity - 1].copy_from_slice(&fill[..capacity - 1]);
    lease.commit(capacity - 1, false).unwrap();
    assert_eq!(session.bytes_submitted(), capacity as u64 - 1);

    let lease = session.lock_buffer().unwrap();
    let over = lease.capacity() + 1;
    match lease.commit(over, true) {
        Err(Error::ProtocolViolation(_)) => {}
        other => panic!("overrun commit should be a protocol violation, got {other:?}"),
    }
    // The rejected lease unlocked the buffer; the session carries on
    {
        let _abandoned = session.lock_buffer().unwrap();
    }
    session.write(&[fill[0]]).unwrap();
    session.write(&fill[..capacity]).unwrap();
    session.finish(&[], 0).unwrap();

    let decoder = DecodeSession::open(engine, &path).unwrap();
    assert_eq!(decoder.length(), 2 * capacity as u64);
}

#[test]
fn test_close_twice_and_use_after_close() {
    let (reference, engine) = engine_with_frames(128);
    let path = temp_path("close_twice");
    encode(&engine, &path, &EncodeOptions::new(CD), &sawtooth_pcm(200, 2));

    let mut session = DecodeSession::open(engine.clone(), &path).unwrap();
    session.close();
    assert!(session.is_closed());
    session.close();
    assert_eq!(reference.live_handles(), 0);

    assert!(matches!(session.position(), Err(Error::ProtocolViolation(_))));
    let err = session.read(&mut [0u8; 16]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let out = temp_path("close_twice_encode");
    let mut encoder = EncodeSession::create(engine, &out, &EncodeOptions::new(CD)).unwrap();
    encoder.write(&sawtooth_pcm(10, 2)).unwrap();
    encoder.finish(&[], 0).unwrap();
    assert!(matches!(encoder.finish(&[], 0), Err(Error::ProtocolViolation(_))));
    assert!(matches!(encoder.write(&[0u8; 4]), Err(Error::ProtocolViolation(_))));
    assert!(matches!(encoder.abort(), Err(Error::ProtocolViolation(_))));
    encoder.close().unwrap();
    encoder.close().unwrap();
    assert!(out.exists(), "a finished output survives close");
}

#[test]
fn test_missing_input_reports_engine_status() {
    let (reference, engine) = engine_with_frames(128);
    let result = DecodeSession::open(engine, temp_path("does_not_exist"));
    match result {
        Err(Error::Init { code }) => assert_eq!(code.get(), 1002),
        Err(other) => panic!("expected Init error, got {other:?}"),
        Ok(_) => panic!("opening a missing file should fail"),
    }
    assert_eq!(reference.live_handles(), 0);
}

#[test]
fn test_non_ape_input_is_rejected() {
    let (_, engine) = engine_with_frames(128);
    let path = temp_path("not_ape");
    std::fs::write(&path, pseudo_random_bytes(4096, 3)).unwrap();
    let err = DecodeSession::open(engine, &path).err().unwrap();
    assert_eq!(err.status().map(|c| c.get()), Some(1002));
}

#[test]
fn test_start_failure_releases_handle() {
    let (reference, engine) = engine_with_frames(128);
    let path = std::env::temp_dir()
        .join(format!("ape_test_{}_no_such_dir", std::process::id()))
        .join("out.ape");
    match EncodeSession::create(engine, &path, &EncodeOptions::new(CD)) {
        Err(Error::Init { code }) => assert_eq!(code.get(), 1003),
        Err(other) => panic!("expected Init error, got {other:?}"),
        Ok(_) => panic!("starting into a missing directory should fail"),
    }
    assert_eq!(reference.live_handles(), 0);
}

#[test]
fn test_unsupported_format_is_rejected_before_engine() {
    let (reference, engine) = engine_with_frames(128);
    let options = EncodeOptions::new(WaveFormat::new(44100, 12, 2));
    let err = EncodeSession::create(engine.clone(), temp_path("bad_format"), &options)
        .err()
        .unwrap();
    assert!(matches!(err, Error::InvalidFormat(_)));

    let options = EncodeOptions::new(WaveFormat::new(44100, 32, 16_384));
    let path = temp_path("too_many_channels");
    let err = EncodeSession::create(engine, &path, &options).err().unwrap();
    assert!(matches!(err, Error::InvalidFormat(_)));
    assert!(!path.exists());
    assert_eq!(reference.live_handles(), 0);
}

#[test]
fn test_drop_without_finish_discards_output() {
    let (reference, engine) = engine_with_frames(64);
    let path = temp_path("dropped");
    {
        let mut session = EncodeSession::create(engine, &path, &EncodeOptions::new(CD)).unwrap();
        session.write(&sawtooth_pcm(500, 2)).unwrap();
        assert!(path.exists());
    }
    assert!(!path.exists(), "an unfinished output must not survive");
    assert_eq!(reference.live_handles(), 0);
}

#[test]
fn test_abort_discards_output() {
    let (reference, engine) = engine_with_frames(64);
    let path = temp_path("aborted");
    let mut session = EncodeSession::create(engine, &path, &EncodeOptions::new(CD)).unwrap();
    session.write(&sawtooth_pcm(100, 2)).unwrap();
    session.abort().unwrap();
    assert_eq!(session.state(), EncodeState::Aborted);
    assert!(!path.exists());
    assert_eq!(reference.live_handles(), 0);

    session.abort().unwrap();
    assert!(matches!(session.finish(&[], 0), Err(Error::ProtocolViolation(_))));
}

#[test]
fn test_max_audio_bytes_is_enforced() {
    let (_, engine) = engine_with_frames(64);
    let path = temp_path("max_bytes");
    let options = EncodeOptions::new(CD).with_max_audio_bytes(400);
    let mut session = EncodeSession::create(engine, &path, &options).unwrap();
    session.write(&sawtooth_pcm(100, 2)).unwrap();
    match session.write(&[0u8; 4]) {
        Err(Error::Write { code }) => assert_eq!(code.get(), 6000),
        other => panic!("expected Write error, got {other:?}"),
    }
    session.finish(&[], 0).unwrap();
}

#[test]
fn test_info_queries() {
    let (_, engine) = engine_with_frames(100);
    let path = temp_path("info");
    let pcm = sawtooth_pcm(1050, 2);
    let options = EncodeOptions::new(CD).with_level(CompressionLevel::ExtraHigh);
    let mut session = EncodeSession::create(engine.clone(), &path, &options).unwrap();
    session.write(&pcm).unwrap();
    session.finish(b"trailer|not-wav", 7).unwrap();

    let decoder = DecodeSession::open(engine, &path).unwrap();
    let int = |field| decoder.info_int(field).unwrap();
    assert_eq!(int(InfoField::FileVersion), 3990);
    assert_eq!(int(InfoField::CompressionLevel), 4000);
    assert_eq!(int(InfoField::BlocksPerFrame), 100);
    assert_eq!(int(InfoField::TotalFrames), 11);
    assert_eq!(int(InfoField::FinalFrameBlocks), 50);
    assert_eq!(int(InfoField::TotalBlocks), 1050);
    assert_eq!(int(InfoField::DecompressTotalBlocks), 1050);
    assert_eq!(int(InfoField::BytesPerSample), 2);
    assert_eq!(int(InfoField::WavDataBytes), 4200);
    assert_eq!(int(InfoField::WavTerminatingBytes), 7);
    assert_eq!(int(InfoField::LengthMs), 1050 * 1000 / 44100);
    assert_eq!(int(InfoField::PeakLevel), -1);

    let frame = decoder.info_with(InfoField::FrameBlocks, 10, 0).unwrap();
    assert_eq!(frame, InfoValue::Integer(50));
    assert!(matches!(
        decoder.info_with(InfoField::FrameBytes, 99, 0),
        Err(Error::Query { field: InfoField::FrameBytes, .. })
    ));

    assert_eq!(
        decoder.info(InfoField::WaveFormatEx).unwrap(),
        InfoValue::Format(CD)
    );
    assert!(matches!(
        decoder.info_int(InfoField::WavHeaderData),
        Err(Error::ProtocolViolation(_))
    ));
    assert_eq!(decoder.wav_terminating_data().unwrap(), b"trailer");

    // No header stored: a canonical one is synthesised
    let header = decoder.wav_header_data().unwrap();
    assert_eq!(header, CD.wav_header(4200).to_vec());
    assert_eq!(int(InfoField::WavHeaderBytes), 44);

    let info = decoder.stream_info().unwrap();
    assert_eq!(info.total_blocks, 1050);
    assert_eq!(info.total_frames, 11);
}

#[test]
fn test_stored_wav_header_is_returned_verbatim() {
    let (_, engine) = engine_with_frames(100);
    let path = temp_path("stored_header");
    let mut header = CD.wav_header(800).to_vec();
    header.extend_from_slice(b"LIST\x04\x00\x00\x00abcd");

    let options = EncodeOptions::new(CD).with_header(header.clone());
    encode(&engine, &path, &options, &sawtooth_pcm(200, 2));

    let decoder = DecodeSession::open(engine, &path).unwrap();
    assert_eq!(decoder.wav_header_data().unwrap(), header);
    assert_eq!(decoder.info_int(InfoField::WavHeaderBytes).unwrap(), header.len() as i64);
    assert_eq!(decoder.total_blocks(), 200);
}

#[test]
fn test_independent_handles_on_one_file() {
    let (reference, engine) = engine_with_frames(64);
    let path = temp_path("two_handles");
    let pcm = sawtooth_pcm(640, 2);
    encode(&engine, &path, &EncodeOptions::new(CD), &pcm);

    let mut a = DecodeSession::open(engine.clone(), &path).unwrap();
    let mut b = DecodeSession::open(engine, &path).unwrap();
    assert_eq!(reference.live_handles(), 2);

    b.seek(SeekFrom::Start(1000)).unwrap();
    let mut buf_a = [0u8; 16];
    let mut buf_b = [0u8; 16];
    a.read_exact(&mut buf_a).unwrap();
    b.read_exact(&mut buf_b).unwrap();
    assert_eq!(&buf_a, &pcm[..16]);
    assert_eq!(&buf_b, &pcm[1000..1016]);
    assert_eq!(a.position().unwrap(), 16);
    assert_eq!(b.position().unwrap(), 1016);
}

#[test]
fn test_sessions_on_separate_threads() {
    let (reference, engine) = engine_with_frames(64);
    let path = temp_path("threads");
    let pcm = Arc::new(pseudo_random_bytes(64 * 4 * 20, 17));
    encode(&engine, &path, &EncodeOptions::new(CD), &pcm);

    let workers: Vec<_> = [0u64, 2560]
        .into_iter()
        .map(|start| {
            let mut session = DecodeSession::open(engine.clone(), &path).unwrap();
            let pcm = Arc::clone(&pcm);
            std::thread::spawn(move || {
                session.seek(SeekFrom::Start(start)).unwrap();
                // chunk size that is not a multiple of the block
                let out = read_all_in_chunks(&mut session, 333);
                assert_eq!(out, pcm[start as usize..]);
                session.position().unwrap()
            })
        })
        .collect();

    for worker in workers {
        assert_eq!(worker.join().unwrap(), pcm.len() as u64);
    }
    assert_eq!(reference.live_handles(), 0);
}

#[test]
fn test_tags_set_read_merge_remove() {
    let (_, engine) = engine_with_frames(128);
    let path = temp_path("tags");
    let pcm = sawtooth_pcm(300, 2);
    encode(&engine, &path, &EncodeOptions::new(CD), &pcm);
    assert_eq!(read_tag(engine.as_ref(), &path).unwrap(), None);

    let fields = TagFields {
        artist: "Field Recordings".into(),
        album: "Harbour".into(),
        title: "Foghorn".into(),
        genre: "Ambient".into(),
        year: "2019".into(),
        track: "3".into(),
        ..TagFields::default()
    };
    tag_file(engine.as_ref(), &path, &fields, true).unwrap();
    assert_eq!(read_tag(engine.as_ref(), &path).unwrap(), Some(fields.clone()));

    // A tagged file still decodes in full
    let mut decoder = DecodeSession::open(engine.clone(), &path).unwrap();
    assert_eq!(read_all_in_chunks(&mut decoder, 512), pcm);
    match decoder.info(InfoField::Tag).unwrap() {
        InfoValue::Bytes(raw) => assert_eq!(&raw[..3], b"TAG"),
        other => panic!("tag answered with {other:?}"),
    }
    drop(decoder);

    let retitle = TagFields {
        title: "Foghorn (dawn)".into(),
        ..TagFields::default()
    };
    tag_file(engine.as_ref(), &path, &retitle, false).unwrap();
    let merged = read_tag(engine.as_ref(), &path).unwrap().unwrap();
    assert_eq!(merged.title, "Foghorn (dawn)");
    assert_eq!(merged.artist, "Field Recordings");

    tag_file(engine.as_ref(), &path, &retitle, true).unwrap();
    let cleared = read_tag(engine.as_ref(), &path).unwrap().unwrap();
    assert_eq!(cleared.artist, "");

    remove_tag(engine.as_ref(), &path).unwrap();
    assert_eq!(read_tag(engine.as_ref(), &path).unwrap(), None);
    remove_tag(engine.as_ref(), &path).unwrap();

    let mut decoder = DecodeSession::open(engine, &path).unwrap();
    assert_eq!(read_all_in_chunks(&mut decoder, 512), pcm);
}

#[test]
fn test_corrupt_frame_fails_checksum() {
    let (_, engine) = engine_with_frames(64);
    let path = temp_path("corrupt");
    encode(&engine, &path, &EncodeOptions::new(CD), &pseudo_random_bytes(64 * 4 * 3, 11));

    // First frame payload starts right after the 64-byte header
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[64 + 10] ^= 0xFF;
    std::fs::write(&path, &bytes).unwrap();

    let mut decoder = DecodeSession::open(engine, &path).unwrap();
    let mut buf = [0u8; 256];
    match decoder.read_blocks(&mut buf, 64) {
        Err(Error::Read { code }) => assert_eq!(code.get(), 1009),
        other => panic!("expected checksum failure, got {other:?}"),
    }
}
