//! Frame extraction over arbitrary chunk boundaries

use kucoin_ws::FrameExtractor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const FRAMES: &[&str] = &[
    r#"{"id":"1","type":"welcome"}"#,
    r#"{"type":"message","topic":"/market/level2:BTC-USDT","data":{"changes":{"asks":[["18906","0.00331","14103845"]],"bids":[]},"sequenceStart":14103845,"sequenceEnd":14103845}}"#,
    r#"{"type":"message","subject":"braces","data":{"text":"{not} a {frame}"}}"#,
    r#"{"type":"message","data":{"quote":"she said \"}\" twice","slash":"\\"}}"#,
    r#"{"type":"message","data":{"unicode":"価格 ✓","nested":{"a":{"b":{"c":{}}}}}}"#,
    r#"{"id":"9","type":"pong"}"#,
];

fn stream() -> Vec<u8> {
    FRAMES.join("\n").into_bytes()
}

fn run(chunks: &[&[u8]]) -> Vec<String> {
    let mut framer = FrameExtractor::new();
    let mut out = Vec::new();
    for chunk in chunks {
        out.extend(framer.extract(chunk));
    }
    assert!(framer.is_idle());
    out
}

#[test]
fn test_whole_stream() {
    let bytes = stream();
    assert_eq!(run(&[&bytes[..]]), FRAMES);
}

#[test]
fn test_one_byte_chunks() {
    let bytes = stream();
    let chunks: Vec<&[u8]> = bytes.chunks(1).collect();
    assert_eq!(run(&chunks), FRAMES);
}

#[test]
fn test_random_chunking() {
    let bytes = stream();
    let mut rng = StdRng::seed_from_u64(0x6b75636f696e);

    for _ in 0..500 {
        let mut chunks: Vec<&[u8]> = Vec::new();
        let mut rest = &bytes[..];
        while !rest.is_empty() {
            let take = rng.gen_range(1..=rest.len().min(64));
            let (head, tail) = rest.split_at(take);
            chunks.push(head);
            rest = tail;
        }
        assert_eq!(run(&chunks), FRAMES);
    }
}

#[test]
fn test_partial_frame_waits() {
    let mut framer = FrameExtractor::new();
    assert!(framer.extract(br#"{"type":"mess"#).is_empty());
    assert!(!framer.is_idle());
    assert_eq!(framer.extract(br#"age"}"#), vec![r#"{"type":"message"}"#]);
}
