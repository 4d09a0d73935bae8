use strata_core::verify::is_empty_root;
use strata_core::MerkleTree;

use crate::*;

const CHUNK: usize = 64;

async fn round_trip(len: usize) {
    let fx = Fixture::new(3);
    let data = pattern(len);
    let src = fx.write("src.bin", &data);
    let client = fx.client(|t| {
        t.chunk_size = CHUNK;
        t.replicas = 2;
    });

    let (tx, root) = client.upload_file(&src).await.unwrap();
    assert!(tx.starts_with("0x"), "tx: {tx}");

    let out = fx.path(&format!("out/{len}.bin"));
    client.download_file(&root, &out).await.unwrap();
    assert_eq!(std::fs::read(&out).unwrap(), data, "round trip of {len} bytes");
}

#[tokio::test]
async fn test_round_trip_empty_file() {
    let fx = Fixture::new(1);
    let src = fx.write("empty.bin", b"");
    let client = fx.client(|t| t.chunk_size = CHUNK);

    let (_, root) = client.upload(&src, 1).await.unwrap();
    assert!(is_empty_root(&root));
    assert_eq!(fx.net.commits().len(), 1);
    assert_eq!(fx.net.total_pushes(), 0);

    let out = fx.path("empty.out");
    client.download(root, &out, true).await.unwrap();
    assert!(std::fs::read(&out).unwrap().is_empty());
}

#[tokio::test]
async fn test_round_trip_single_byte() {
    round_trip(1).await;
}

#[tokio::test]
async fn test_round_trip_exact_chunk() {
    round_trip(CHUNK).await;
}

#[tokio::test]
async fn test_round_trip_short_final_chunk() {
    round_trip(CHUNK * 5 + 17).await;
}

#[tokio::test]
async fn test_root_is_deterministic() {
    let fx = Fixture::new(2);
    let data = pattern(1000);
    let src = fx.write("a.bin", &data);
    let client = fx.client(|t| t.chunk_size = CHUNK);

    let local = client.root_of(&src).unwrap();
    assert_eq!(local, MerkleTree::from_bytes(&data, CHUNK).unwrap().root());

    let (_, first) = client.upload(&src, 1).await.unwrap();
    let (_, second) = client.upload(&src, 2).await.unwrap();
    assert_eq!(first, local);
    assert_eq!(second, local);
}
