// Integration tests for the peerftp client and server
// These tests run both peers over real loopback TCP connections

use peerftp::commands::serve::directory_policy;
use peerftp::networking::{
    read_bool, read_length_prefixed, read_wire_operation, write_bool, write_string, WireOperation,
};
use peerftp::{
    accept_handler, Client, ConnectionOutcome, FileAcceptOptions, FileSendOptions, Metadata, Server,
    ServerConfig, TransferDirection, TransferError, TransferOptions,
};
use rand::Rng;
use serde_json::json;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

fn started_server(root: &Path) -> Server {
    let mut server = Server::new("127.0.0.1:0".parse().unwrap(), ServerConfig::with_root(root));
    server.start().expect("server should start");
    server
}

fn connected_client(server: &Server) -> Client {
    let mut client = Client::new();
    client.connect(server.local_addr().unwrap());
    client
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::rng().fill(&mut data[..]);
    data
}

// ============================================================================
// Client sends, server receives
// ============================================================================

#[tokio::test]
async fn test_send_ten_bytes_in_segments_of_four() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    let source = src.path().join("ten.bin");
    std::fs::write(&source, b"abcdefghij").unwrap();

    let server = started_server(dst.path());
    let client = connected_client(&server);
    let out_dir = dst.path().to_path_buf();
    let handler = accept_handler(move |direction, name, _| {
        assert_eq!(direction, TransferDirection::Receive);
        Some(TransferOptions::Accept(FileAcceptOptions::new(name, out_dir.clone())))
    });

    let server_task = tokio::spawn(async move {
        server
            .accept_connection(Some(&handler), &CancellationToken::new())
            .await
    });

    let report = client
        .send_file(
            FileSendOptions::new(&source).with_max_buffer_size(4),
            None,
            &CancellationToken::new(),
        )
        .await
        .expect("send should succeed");
    assert_eq!(report.segments, 3);
    assert_eq!(report.bytes, 10);

    match server_task.await.unwrap().unwrap() {
        ConnectionOutcome::Received(outcome) => {
            assert!(outcome.complete);
            assert_eq!(outcome.segments, 3);
            assert_eq!(std::fs::read(&outcome.path).unwrap(), b"abcdefghij");
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[tokio::test]
async fn test_metadata_reaches_policy() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    let source = src.path().join("photo.jpg");
    std::fs::write(&source, random_bytes(5000)).unwrap();

    let server = started_server(dst.path());
    let client = connected_client(&server);
    let out_dir = dst.path().to_path_buf();
    let handler = accept_handler(move |_, name, metadata| {
        let metadata = metadata.expect("metadata should arrive");
        assert_eq!(metadata["album"], "holiday");
        assert_eq!(metadata["rating"], 5);
        assert_eq!(metadata["tags"], json!(["sea", null]));
        Some(TransferOptions::Accept(FileAcceptOptions::new(
            format!("copy_{}", name),
            out_dir.clone(),
        )))
    });
    let server_task = tokio::spawn(async move {
        server
            .accept_connection(Some(&handler), &CancellationToken::new())
            .await
    });

    let metadata: Metadata = match json!({"album": "holiday", "rating": 5, "tags": ["sea", null]}) {
        serde_json::Value::Object(map) => map,
        _ => unreachable!(),
    };
    client
        .send_file(FileSendOptions::new(&source), Some(metadata), &CancellationToken::new())
        .await
        .unwrap();

    server_task.await.unwrap().unwrap();
    assert_eq!(
        std::fs::read(dst.path().join("copy_photo.jpg")).unwrap(),
        std::fs::read(&source).unwrap()
    );
}

#[tokio::test]
async fn test_denied_send_moves_no_bytes() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    let source = src.path().join("secret.txt");
    std::fs::write(&source, b"do not send").unwrap();

    let server = started_server(dst.path());
    let client = connected_client(&server);
    let handler = accept_handler(|_, _, _| None);
    let server_task = tokio::spawn(async move {
        server
            .accept_connection(Some(&handler), &CancellationToken::new())
            .await
    });

    let err = client
        .send_file(FileSendOptions::new(&source), None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::PermissionDenied));

    assert_eq!(server_task.await.unwrap().unwrap(), ConnectionOutcome::Denied);
    assert!(!dst.path().join("secret.txt").exists());
}

// ============================================================================
// Client requests, server sends
// ============================================================================

#[tokio::test]
async fn test_request_without_policy_auto_grants() {
    let served = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    let content = random_bytes(300_000);
    std::fs::write(served.path().join("dataset.csv"), &content).unwrap();

    let server = started_server(served.path());
    let client = connected_client(&server);
    let server_task = tokio::spawn(async move {
        server
            .accept_connection(None, &CancellationToken::new())
            .await
    });

    let out_dir = dst.path().to_path_buf();
    let outcome = client
        .request_file(
            move || FileAcceptOptions::new("dataset.csv", out_dir),
            None,
            &CancellationToken::new(),
        )
        .await
        .expect("request should be granted");

    assert!(outcome.complete);
    assert_eq!(outcome.bytes, content.len() as u64);
    assert_eq!(std::fs::read(dst.path().join("dataset.csv")).unwrap(), content);

    match server_task.await.unwrap().unwrap() {
        ConnectionOutcome::Sent(report) => assert_eq!(report.bytes, content.len() as u64),
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[tokio::test]
async fn test_request_missing_file_is_denied() {
    let served = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();

    let server = started_server(served.path());
    let client = connected_client(&server);
    let policy = directory_policy(served.path().to_path_buf(), true, 1024);
    let server_task = tokio::spawn(async move {
        server
            .accept_connection(Some(&policy), &CancellationToken::new())
            .await
    });

    let out_dir = dst.path().to_path_buf();
    let err = client
        .request_file(
            move || FileAcceptOptions::new("nothing.here", out_dir),
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::PermissionDenied));
    assert_eq!(server_task.await.unwrap().unwrap(), ConnectionOutcome::Denied);
    assert!(!dst.path().join("nothing.here").exists());
}

// ============================================================================
// Concurrency and cancellation
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_simultaneous_connections_stay_separate() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    let first = random_bytes(200_000);
    let second = random_bytes(150_000);
    std::fs::write(src.path().join("first.bin"), &first).unwrap();
    std::fs::write(src.path().join("second.bin"), &second).unwrap();

    let server = Arc::new(started_server(dst.path()));
    let addr = server.local_addr().unwrap();

    let mut accepts = Vec::new();
    for _ in 0..2 {
        let server = Arc::clone(&server);
        accepts.push(tokio::spawn(async move {
            server.accept_connection(None, &CancellationToken::new()).await
        }));
    }

    let send = |name: &'static str| {
        let path = src.path().join(name);
        async move {
            let mut client = Client::new();
            client.connect(addr);
            client
                .send_file(
                    FileSendOptions::new(path).with_max_buffer_size(1000),
                    None,
                    &CancellationToken::new(),
                )
                .await
        }
    };
    let (a, b) = tokio::join!(send("first.bin"), send("second.bin"));
    assert_eq!(a.unwrap().segments, 200);
    assert_eq!(b.unwrap().segments, 150);

    for accept in accepts {
        assert!(matches!(
            accept.await.unwrap().unwrap(),
            ConnectionOutcome::Received(ref outcome) if outcome.complete
        ));
    }
    assert_eq!(std::fs::read(dst.path().join("first.bin")).unwrap(), first);
    assert_eq!(std::fs::read(dst.path().join("second.bin")).unwrap(), second);
}

#[tokio::test]
async fn test_cancelled_send_never_ends_transfer() {
    const FILE_LEN: usize = 32 * 1024 * 1024;
    const SEGMENT: usize = 64 * 1024;
    let src = tempfile::tempdir().unwrap();
    let source = src.path().join("large.bin");
    std::fs::write(&source, vec![0x5Au8; FILE_LEN]).unwrap();

    // Hand-rolled peer that grants, reads one segment, then stalls
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let (returned_tx, returned_rx) = tokio::sync::oneshot::channel::<()>();
    let peer = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        assert_eq!(
            read_wire_operation(&mut stream).await.unwrap(),
            Some(WireOperation::RequestSendPermission)
        );
        assert!(!read_bool(&mut stream).await.unwrap());
        read_length_prefixed(&mut stream, 1024).await.unwrap();
        write_bool(&mut stream, true).await.unwrap();

        assert_eq!(
            read_wire_operation(&mut stream).await.unwrap(),
            Some(WireOperation::SendSegment)
        );
        read_length_prefixed(&mut stream, u32::MAX).await.unwrap();
        trigger.cancel();
        returned_rx.await.unwrap();

        // Drain whatever was already buffered; the end marker must never show up
        let mut after_cancel = 0usize;
        loop {
            match read_wire_operation(&mut stream).await {
                Ok(Some(WireOperation::SendSegment)) => {
                    if read_length_prefixed(&mut stream, u32::MAX).await.is_err() {
                        return (after_cancel, false);
                    }
                    after_cancel += 1;
                }
                Ok(Some(WireOperation::EndOfTransfer)) => return (after_cancel, true),
                Ok(_) => {}
                Err(_) => return (after_cancel, false),
            }
        }
    });

    let mut client = Client::new();
    client.connect(addr);
    let err = client
        .send_file(
            FileSendOptions::new(&source).with_max_buffer_size(SEGMENT),
            None,
            &cancel,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::Cancelled));
    drop(client);
    returned_tx.send(()).unwrap();

    let (after_cancel, saw_end_marker) = peer.await.unwrap();
    assert!(!saw_end_marker);
    // Socket buffers hold some segments, never the rest of the file
    assert!(
        after_cancel < FILE_LEN / SEGMENT / 2,
        "{} segments arrived after cancellation",
        after_cancel
    );
}

#[tokio::test]
async fn test_interrupted_sender_leaves_partial_file() {
    let dst = tempfile::tempdir().unwrap();
    let server = started_server(dst.path());
    let addr = server.local_addr().unwrap();
    let server_task = tokio::spawn(async move {
        server
            .accept_connection(None, &CancellationToken::new())
            .await
    });

    // Peer offers a file, sends one segment and disconnects
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    peerftp::networking::write_operation(&mut stream, WireOperation::RequestSendPermission)
        .await
        .unwrap();
    write_bool(&mut stream, false).await.unwrap();
    write_string(&mut stream, "partial.bin").await.unwrap();
    assert!(read_bool(&mut stream).await.unwrap());
    peerftp::networking::write_operation(&mut stream, WireOperation::SendSegment)
        .await
        .unwrap();
    peerftp::networking::write_length_prefixed(&mut stream, b"first half")
        .await
        .unwrap();
    drop(stream);

    match server_task.await.unwrap().unwrap() {
        ConnectionOutcome::Received(outcome) => {
            assert!(!outcome.complete);
            assert_eq!(std::fs::read(&outcome.path).unwrap(), b"first half");
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}
