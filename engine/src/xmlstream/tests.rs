// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use super::*;

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufStream, DuplexStream};

use futures::StreamExt;

use stanzas::ns;

async fn read_until(io: &mut DuplexStream, needle: &str) -> String {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let text = String::from_utf8_lossy(&buffer).into_owned();
        if text.contains(needle) {
            return text;
        }
        let n = io.read(&mut chunk).await.expect("peer read failed");
        assert!(n > 0, "eof while waiting for {:?}", needle);
        buffer.extend_from_slice(&chunk[..n]);
    }
}

async fn peer_open_stream(io: &mut DuplexStream) {
    read_until(io, ">").await;
    io.write_all(
        b"<?xml version='1.0'?>\
          <stream:stream xmlns='jabber:client' \
            xmlns:stream='http://etherx.jabber.org/streams' \
            id='test-stream' from='example.org' version='1.0'>\
          <stream:features/>",
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn header_and_element_exchange() {
    let (client_io, mut peer) = tokio::io::duplex(65536);

    let peer_task = tokio::spawn(async move {
        peer_open_stream(&mut peer).await;
        peer.write_all(
            b"<message xmlns='jabber:client'><body>hello</body></message>",
        )
        .await
        .unwrap();

        // Expect the client's message to arrive, then close the stream.
        read_until(&mut peer, "</message>").await;
        peer.write_all(b"</stream:stream>").await.unwrap();
        peer
    });

    let pending = initiate_stream(
        BufStream::new(client_io),
        ns::JABBER_CLIENT,
        StreamHeader::to_server("example.org"),
        Timeouts::default(),
    )
    .await
    .unwrap();
    assert_eq!(pending.header().id.as_deref(), Some("test-stream"));

    let (features, mut stream) = pending.recv_features().await.unwrap();
    assert!(features.sasl_mechanisms.is_empty());
    assert_eq!(stream.stream_id(), Some("test-stream"));

    let element = stream.next().await.unwrap().unwrap();
    assert!(element.is("message", ns::JABBER_CLIENT));
    assert_eq!(
        element.get_child("body", ns::JABBER_CLIENT).unwrap().text(),
        "hello"
    );

    let reply: minidom::Element =
        "<message xmlns='jabber:client'><body>回答</body></message>"
            .parse()
            .unwrap();
    stream.send(&reply).await.unwrap();

    match stream.next().await {
        Some(Err(ReadError::StreamFooterReceived)) => (),
        other => panic!("expected stream footer, got {:?}", other),
    }

    peer_task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn soft_then_hard_timeout_on_silence() {
    let (client_io, mut peer) = tokio::io::duplex(65536);

    let pending_peer = tokio::spawn(async move {
        peer_open_stream(&mut peer).await;
        // Keep the connection open but silent.
        std::future::pending::<()>().await;
    });

    let pending = initiate_stream(
        BufStream::new(client_io),
        ns::JABBER_CLIENT,
        StreamHeader::to_server("example.org"),
        Timeouts::tight(),
    )
    .await
    .unwrap();
    let (_features, mut stream) = pending.recv_features().await.unwrap();

    match stream.next().await {
        Some(Err(ReadError::SoftTimeout)) => (),
        other => panic!("expected soft timeout, got {:?}", other),
    }
    match stream.next().await {
        Some(Err(ReadError::HardError(e))) => {
            assert_eq!(e.kind(), io::ErrorKind::TimedOut)
        }
        other => panic!("expected hard timeout, got {:?}", other),
    }

    pending_peer.abort();
}

#[tokio::test(start_paused = true)]
async fn whitespace_keepalive_resets_the_clock() {
    let (client_io, mut peer) = tokio::io::duplex(65536);

    let peer_task = tokio::spawn(async move {
        peer_open_stream(&mut peer).await;
        // Three keepalives, each well within the soft window.
        for _ in 0..3u8 {
            tokio::time::sleep(std::time::Duration::from_millis(60)).await;
            peer.write_all(b" ").await.unwrap();
        }
        peer.write_all(b"<iq xmlns='jabber:client' id='x' type='result'/>")
            .await
            .unwrap();
        peer
    });

    let pending = initiate_stream(
        BufStream::new(client_io),
        ns::JABBER_CLIENT,
        StreamHeader::to_server("example.org"),
        Timeouts::tight(),
    )
    .await
    .unwrap();
    let (_features, mut stream) = pending.recv_features().await.unwrap();

    // 3 × 60ms of silence spans the 100ms soft window, but each
    // keepalive resets it, so the iq arrives without a timeout.
    let element = stream.next().await.unwrap().unwrap();
    assert!(element.is("iq", ns::JABBER_CLIENT));

    peer_task.await.unwrap();
}
