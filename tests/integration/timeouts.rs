use std::time::{Duration, Instant};

use strata_transfer::{Fault, TransferError};

use crate::*;

fn slow() -> Fault {
    Fault {
        latency: Duration::from_secs(10),
        ..Fault::default()
    }
}

#[tokio::test]
async fn test_upload_timeout_leaves_no_tasks() {
    let fx = Fixture::new(3);
    for id in ["node-0", "node-1", "node-2"] {
        fx.net.set_fault(id, slow());
    }
    let src = fx.write("src.bin", &pattern(64 * 20));
    let client = fx.client(|t| {
        t.chunk_size = 64;
        t.timeout_secs = 1;
    });

    let started = Instant::now();
    let err = client.upload(&src, 2).await.unwrap_err();
    assert!(matches!(err, TransferError::UploadTimeout(_)), "{err}");
    assert!(err.is_timeout());
    assert!(started.elapsed() < Duration::from_secs(5));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(fx.net.in_flight(), 0);
}

#[tokio::test]
async fn test_download_timeout_removes_partial_file() {
    let fx = Fixture::new(2);
    let data = pattern(64 * 10);
    let info = fx.net.store_file("node-0", &data, 64).unwrap();
    fx.net.set_fault("node-0", slow());
    let client = fx.client(|t| {
        t.chunk_size = 64;
        t.timeout_secs = 1;
    });

    let out = fx.path("out.bin");
    let err = client.download(info.root, &out, true).await.unwrap_err();
    assert!(matches!(err, TransferError::DownloadTimeout(_)), "{err}");
    assert!(!out.exists());
    assert!(!fx.path("out.bin.part").exists());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(fx.net.in_flight(), 0);
}
