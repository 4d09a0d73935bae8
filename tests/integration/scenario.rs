use strata_core::chunker::chunk_count;
use strata_core::crypto::hash;
use strata_core::MerkleTree;

use crate::*;

const MIB: usize = 1024 * 1024;
const CHUNK: usize = 256 * 1024;

/// 10 MiB, 256 KiB chunks, 3 replicas, 5 healthy nodes.
#[tokio::test]
async fn test_ten_mib_three_replicas_five_nodes() {
    let fx = Fixture::new(5);
    let data = pattern(10 * MIB);
    let src = fx.write("ten.bin", &data);
    let client = fx.client(|t| {
        t.chunk_size = CHUNK;
        t.replicas = 3;
    });

    let (tx, root) = client.upload(&src, 3).await.unwrap();

    let chunks = chunk_count(data.len() as u64, CHUNK);
    assert_eq!(chunks, 40);
    assert_eq!(root, MerkleTree::from_bytes(&data, CHUNK).unwrap().root());
    assert_eq!(fx.net.commits(), vec![(root, tx)]);
    for index in 0..chunks {
        assert_eq!(fx.net.holders(root, index), 3, "chunk {index}");
    }
    assert_eq!(fx.net.holders(root, chunks), 0);

    let out = fx.path("ten.out");
    client.download(root, &out, true).await.unwrap();
    let copy = std::fs::read(&out).unwrap();
    assert_eq!(copy.len(), data.len());
    assert_eq!(hash(&copy), hash(&data));
    assert_eq!(copy, data);
}
