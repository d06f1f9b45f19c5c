// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! End-to-end session tests against a scripted in-process server.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use base64::{engine::general_purpose::STANDARD as Base64, Engine};
use futures::StreamExt;
use minidom::Element;
use tokio::io::{BufStream, DuplexStream};

use sasl::common::scram::{ScramProvider, Sha1};
use stanzas::jid::Jid;
use stanzas::stream_features::StreamFeatures;
use stanzas::{ns, Stanza};

use crate::client::{Client, IqRequest, IqResponse};
use crate::connect::{ServerConnector, ServerConnectorError};
use crate::error::Error;
use crate::event::Event;
use crate::session::{StanzaStage, StanzaState};
use crate::xmlstream::{
    accept_stream, initiate_stream, PendingFeaturesRecv, ReadError, StreamHeader, Timeouts,
    XmlStream,
};

type ServerStream = XmlStream<BufStream<DuplexStream>>;

/// Hands out pre-arranged duplex connections, one per connect call.
#[derive(Clone)]
struct TestConnector(Arc<Mutex<VecDeque<DuplexStream>>>);

impl TestConnector {
    fn new<I: IntoIterator<Item = DuplexStream>>(conns: I) -> Self {
        TestConnector(Arc::new(Mutex::new(conns.into_iter().collect())))
    }
}

impl fmt::Debug for TestConnector {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("TestConnector")
    }
}

#[derive(Debug)]
struct OutOfConnections;

impl fmt::Display for OutOfConnections {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("no more scripted connections")
    }
}

impl std::error::Error for OutOfConnections {}
impl ServerConnectorError for OutOfConnections {}

impl ServerConnector for TestConnector {
    type Stream = BufStream<DuplexStream>;

    async fn connect(
        &self,
        jid: &Jid,
        ns: &'static str,
        timeouts: Timeouts,
    ) -> Result<PendingFeaturesRecv<Self::Stream>, Error> {
        let io = self
            .0
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(OutOfConnections)?;
        Ok(initiate_stream(
            BufStream::new(io),
            ns,
            StreamHeader::to_server(jid.domain()),
            timeouts,
        )
        .await?)
    }
}

fn server_header() -> StreamHeader {
    StreamHeader {
        from: Some("example.org".to_owned()),
        to: None,
        id: Some("srv-stream".to_owned()),
    }
}

async fn accept(io: DuplexStream, features: StreamFeatures) -> ServerStream {
    let accepted = accept_stream(BufStream::new(io), ns::JABBER_CLIENT, Timeouts::default())
        .await
        .unwrap();
    accepted
        .send_header(server_header())
        .await
        .unwrap()
        .send_features(features)
        .await
        .unwrap()
}

async fn accept_restart(stream: ServerStream, features: StreamFeatures) -> ServerStream {
    stream
        .accept_reset()
        .await
        .unwrap()
        .send_header(server_header())
        .await
        .unwrap()
        .send_features(features)
        .await
        .unwrap()
}

async fn recv(stream: &mut ServerStream) -> Element {
    loop {
        match stream.next().await {
            Some(Ok(element)) => return element,
            Some(Err(ReadError::SoftTimeout)) => continue,
            other => panic!("server stream ended unexpectedly: {:?}", other),
        }
    }
}

/// Receive, transparently answering `<r/>` with the running stanza
/// count and skipping liveness pings.
async fn recv_stanza(stream: &mut ServerStream, count: &mut u32) -> Element {
    loop {
        let element = recv(stream).await;
        if element.is("r", ns::SM) {
            let ack: Element = format!("<a xmlns='{}' h='{}'/>", ns::SM, count)
                .parse()
                .unwrap();
            stream.send(&ack).await.unwrap();
            continue;
        }
        if element.is("iq", ns::JABBER_CLIENT)
            && element
                .attr("id")
                .map(|id| id.starts_with(super::PING_PROBE_ID_PREFIX))
                .unwrap_or(false)
        {
            continue;
        }
        if element.is("iq", ns::JABBER_CLIENT)
            || element.is("message", ns::JABBER_CLIENT)
            || element.is("presence", ns::JABBER_CLIENT)
        {
            *count += 1;
        }
        return element;
    }
}

fn sasl_features(mechanisms: &[&str]) -> StreamFeatures {
    StreamFeatures {
        sasl_mechanisms: mechanisms.iter().map(|m| m.to_string()).collect(),
        ..StreamFeatures::default()
    }
}

fn post_auth_features() -> StreamFeatures {
    StreamFeatures {
        bind: true,
        stream_management: true,
        ..StreamFeatures::default()
    }
}

/// Drive the server side of a SCRAM-SHA-1 exchange, verifying the
/// client's proof for the given password.
async fn serve_scram_sha1(stream: &mut ServerStream, password: &str) {
    let auth = recv(stream).await;
    assert!(auth.is("auth", ns::SASL));
    assert_eq!(auth.attr("mechanism"), Some("SCRAM-SHA-1"));

    let client_first = Base64.decode(auth.text().trim()).unwrap();
    let client_first = String::from_utf8(client_first).unwrap();
    let client_first_bare = client_first.strip_prefix("n,,").unwrap().to_owned();
    let client_nonce = client_first_bare
        .split(",r=")
        .nth(1)
        .unwrap()
        .to_owned();

    let salt = b"0123456789abcdef";
    let iterations = 4096u32;
    let server_nonce = format!("{}srvnonce", client_nonce);
    let server_first = format!(
        "r={},s={},i={}",
        server_nonce,
        Base64.encode(salt),
        iterations
    );
    let challenge: Element = format!(
        "<challenge xmlns='{}'>{}</challenge>",
        ns::SASL,
        Base64.encode(&server_first)
    )
    .parse()
    .unwrap();
    stream.send(&challenge).await.unwrap();

    let response = recv(stream).await;
    assert!(response.is("response", ns::SASL));
    let client_final = Base64.decode(response.text().trim()).unwrap();
    let client_final = String::from_utf8(client_final).unwrap();
    let (client_final_bare, proof_b64) = client_final.split_once(",p=").unwrap();
    assert!(client_final_bare.starts_with("c=biws,r="));
    assert!(client_final_bare.ends_with(&server_nonce));

    let salted = Sha1::derive(password.as_bytes(), salt, iterations).unwrap();
    let client_key = Sha1::hmac(b"Client Key", &salted).unwrap();
    let stored_key = Sha1::hash(&client_key);
    let auth_message = format!("{},{},{}", client_first_bare, server_first, client_final_bare);
    let client_signature = Sha1::hmac(auth_message.as_bytes(), &stored_key).unwrap();
    let expected_proof: Vec<u8> = client_key
        .iter()
        .zip(client_signature.iter())
        .map(|(key, sig)| key ^ sig)
        .collect();
    assert_eq!(
        Base64.decode(proof_b64).unwrap(),
        expected_proof,
        "client proof mismatch"
    );

    let server_key = Sha1::hmac(b"Server Key", &salted).unwrap();
    let server_signature = Sha1::hmac(auth_message.as_bytes(), &server_key).unwrap();
    let success: Element = format!(
        "<success xmlns='{}'>{}</success>",
        ns::SASL,
        Base64.encode(format!("v={}", Base64.encode(server_signature)))
    )
    .parse()
    .unwrap();
    stream.send(&success).await.unwrap();
}

async fn serve_plain(stream: &mut ServerStream, expected: &[u8]) {
    let auth = recv(stream).await;
    assert!(auth.is("auth", ns::SASL));
    assert_eq!(auth.attr("mechanism"), Some("PLAIN"));
    assert_eq!(Base64.decode(auth.text().trim()).unwrap(), expected);
    let success: Element = format!("<success xmlns='{}'>=</success>", ns::SASL)
        .parse()
        .unwrap();
    stream.send(&success).await.unwrap();
}

/// Answer the bind request, asserting the requested resource and
/// assigning the given full JID.
async fn serve_bind(stream: &mut ServerStream, expect_resource: Option<&str>, assign: &str) {
    let element = recv(stream).await;
    let bind_req = element
        .get_child("bind", ns::BIND)
        .expect("expected bind iq");
    let requested = bind_req
        .get_child("resource", ns::BIND)
        .map(|resource| resource.text());
    assert_eq!(requested.as_deref(), expect_resource);

    let reply: Element = format!(
        "<iq xmlns='{}' id='{}' type='result'>\
           <bind xmlns='{}'><jid>{}</jid></bind>\
         </iq>",
        ns::JABBER_CLIENT,
        element.attr("id").unwrap(),
        ns::BIND,
        assign
    )
    .parse()
    .unwrap();
    stream.send(&reply).await.unwrap();
}

async fn serve_sm_enable(stream: &mut ServerStream, resume_id: &str) {
    let enable = recv(stream).await;
    assert!(enable.is("enable", ns::SM));
    assert_eq!(enable.attr("resume"), Some("true"));
    let enabled: Element = format!(
        "<enabled xmlns='{}' id='{}' resume='true'/>",
        ns::SM,
        resume_id
    )
    .parse()
    .unwrap();
    stream.send(&enabled).await.unwrap();
}

fn message_to_client(body: &str) -> Element {
    format!(
        "<message xmlns='{}' from='peer@example.org/desk'><body>{}</body></message>",
        ns::JABBER_CLIENT,
        body
    )
    .parse()
    .unwrap()
}

/// The full happy path: STARTTLS is out of scope of the duplex pair, but
/// everything above it runs: SCRAM selection and exchange, stream
/// restart, bind, stream management, request correlation, the
/// unanswered-iq fallback, acked delivery and clean shutdown.
#[tokio::test]
async fn negotiates_full_session_and_exchanges_stanzas() {
    let (client_io, server_io) = tokio::io::duplex(65536);
    let jid = Jid::from_str("alice@example.org/phone").unwrap();

    let server = tokio::spawn(async move {
        let mut stream = accept(server_io, sasl_features(&["PLAIN", "SCRAM-SHA-1"])).await;
        serve_scram_sha1(&mut stream, "pencil").await;

        let mut stream = accept_restart(stream, post_auth_features()).await;
        serve_bind(&mut stream, Some("phone"), "alice@example.org/phone").await;
        serve_sm_enable(&mut stream, "resume-token").await;

        let mut count = 0u32;

        // An iq request nobody will claim: the engine must answer it.
        let odd: Element = format!(
            "<iq xmlns='{}' id='odd-1' type='get' from='peer@example.org/desk'>\
               <query xmlns='urn:example:unknown'/>\
             </iq>",
            ns::JABBER_CLIENT
        )
        .parse()
        .unwrap();
        stream.send(&odd).await.unwrap();

        let reply = recv_stanza(&mut stream, &mut count).await;
        assert!(reply.is("iq", ns::JABBER_CLIENT));
        assert_eq!(reply.attr("type"), Some("error"));
        assert_eq!(reply.attr("id"), Some("odd-1"));
        assert_eq!(reply.attr("to"), Some("peer@example.org/desk"));
        let error = reply.get_child("error", ns::JABBER_CLIENT).unwrap();
        assert!(error
            .get_child("service-unavailable", ns::XMPP_STANZAS)
            .is_some());

        // A message for the application layer.
        stream.send(&message_to_client("ahoy")).await.unwrap();

        // The client's ping request goes through the tracker.
        let ping = recv_stanza(&mut stream, &mut count).await;
        assert!(ping.get_child("ping", ns::PING).is_some());
        let pong: Element = format!(
            "<iq xmlns='{}' id='{}' type='result'/>",
            ns::JABBER_CLIENT,
            ping.attr("id").unwrap()
        )
        .parse()
        .unwrap();
        stream.send(&pong).await.unwrap();

        // A tracked message; ack it so the token reaches Acked.
        let message = recv_stanza(&mut stream, &mut count).await;
        assert!(message.is("message", ns::JABBER_CLIENT));
        assert_eq!(
            message.get_child("body", ns::JABBER_CLIENT).unwrap().text(),
            "hello"
        );
        let ack: Element = format!("<a xmlns='{}' h='{}'/>", ns::SM, count)
            .parse()
            .unwrap();
        stream.send(&ack).await.unwrap();

        // Clean shutdown: unavailable presence, then the footer.
        let presence = recv_stanza(&mut stream, &mut count).await;
        assert!(presence.is("presence", ns::JABBER_CLIENT));
        assert_eq!(presence.attr("type"), Some("unavailable"));
        loop {
            match stream.next().await {
                Some(Err(ReadError::StreamFooterReceived)) | None => break,
                Some(Ok(_)) | Some(Err(ReadError::SoftTimeout)) => continue,
                Some(Err(e)) => panic!("server read error at shutdown: {:?}", e),
            }
        }
    });

    let connector = TestConnector::new([client_io]);
    let mut client =
        Client::new_with_connector(jid, "pencil", connector, Timeouts::default(), false);

    match client.next().await {
        Some(Event::Online { bound_jid, resumed }) => {
            assert_eq!(bound_jid.to_string(), "alice@example.org/phone");
            assert!(!resumed);
        }
        other => panic!("expected Online, got {:?}", other),
    }
    assert_eq!(
        client.bound_jid().map(Jid::to_string),
        Some("alice@example.org/phone".to_owned())
    );
    assert!(client.get_stream_features().unwrap().can_manage());

    // The odd iq is answered internally; the next thing the application
    // sees is the message.
    match client.next().await {
        Some(Event::Stanza(Stanza::Message(message))) => {
            assert_eq!(message.bodies[""], "ahoy");
        }
        other => panic!("expected the message, got {:?}", other),
    }

    // Request correlation: a ping round-trip.
    let token = client
        .send_request(
            None,
            IqRequest::Get(Element::from(stanzas::ping::Ping)),
        )
        .await;
    match token.await {
        Ok(IqResponse::Result(None)) => (),
        other => panic!("expected empty result, got {:?}", other),
    }

    // Acked delivery.
    let message = stanzas::message::Message::chat(Jid::from_str("peer@example.org").unwrap())
        .with_body("hello");
    let mut token = client.send_stanza(message).await.unwrap();
    match token.wait_for(StanzaStage::Acked).await {
        Some(StanzaState::Acked) => (),
        other => panic!("expected ack, got {:?}", other),
    }

    client.disconnect().await;
    server.await.unwrap();
}

#[tokio::test]
async fn auth_failure_is_terminal() {
    let (client_io, server_io) = tokio::io::duplex(65536);
    let jid = Jid::from_str("alice@example.org").unwrap();

    let server = tokio::spawn(async move {
        let mut stream = accept(server_io, sasl_features(&["PLAIN"])).await;
        let auth = recv(&mut stream).await;
        assert!(auth.is("auth", ns::SASL));
        let failure: Element = format!(
            "<failure xmlns='{}'><not-authorized/></failure>",
            ns::SASL
        )
        .parse()
        .unwrap();
        stream.send(&failure).await.unwrap();
    });

    // Auto-reconnect on: an authentication failure must suppress it
    // regardless.
    let connector = TestConnector::new([client_io]);
    let mut client =
        Client::new_with_connector(jid, "wrong", connector, Timeouts::default(), true);

    match client.next().await {
        Some(Event::Disconnected(Error::Auth(_))) => (),
        other => panic!("expected auth failure, got {:?}", other),
    }
    server.await.unwrap();
}

/// Stream management resumption: three stanzas sent, two acked, link
/// drops; after reconnection exactly the unacked one is retransmitted.
#[tokio::test(start_paused = true)]
async fn resumption_retransmits_only_unacked_stanzas() {
    let (client_io1, server_io1) = tokio::io::duplex(65536);
    let (client_io2, server_io2) = tokio::io::duplex(65536);
    let jid = Jid::from_str("alice@example.org").unwrap();

    let server = tokio::spawn(async move {
        // First connection: fresh session.
        let mut stream = accept(server_io1, sasl_features(&["PLAIN"])).await;
        serve_plain(&mut stream, b"\0alice\0pencil").await;
        let mut stream = accept_restart(stream, post_auth_features()).await;
        serve_bind(&mut stream, None, "alice@example.org/gen-1").await;
        serve_sm_enable(&mut stream, "rtok").await;

        let mut count = 0u32;
        let mut bodies = Vec::new();
        while bodies.len() < 3 {
            let message = recv_stanza(&mut stream, &mut count).await;
            assert!(message.is("message", ns::JABBER_CLIENT));
            bodies.push(message.get_child("body", ns::JABBER_CLIENT).unwrap().text());
        }
        assert_eq!(bodies, ["one", "two", "three"]);

        // Only the first two make it into an ack before the link dies.
        let ack: Element = format!("<a xmlns='{}' h='2'/>", ns::SM).parse().unwrap();
        stream.send(&ack).await.unwrap();
        drop(stream);

        // Second connection: resumption.
        let mut stream = accept(server_io2, sasl_features(&["PLAIN"])).await;
        serve_plain(&mut stream, b"\0alice\0pencil").await;
        let mut stream = accept_restart(stream, post_auth_features()).await;

        let resume = recv(&mut stream).await;
        assert!(resume.is("resume", ns::SM), "expected resume, got {:?}", resume);
        assert_eq!(resume.attr("previd"), Some("rtok"));
        assert_eq!(resume.attr("h"), Some("0"));
        let resumed: Element = format!("<resumed xmlns='{}' h='2' previd='rtok'/>", ns::SM)
            .parse()
            .unwrap();
        stream.send(&resumed).await.unwrap();

        // Exactly one retransmission: the third message.
        let mut count = 2u32;
        let message = recv_stanza(&mut stream, &mut count).await;
        assert!(message.is("message", ns::JABBER_CLIENT));
        assert_eq!(
            message.get_child("body", ns::JABBER_CLIENT).unwrap().text(),
            "three"
        );
        let ack: Element = format!("<a xmlns='{}' h='3'/>", ns::SM).parse().unwrap();
        stream.send(&ack).await.unwrap();

        // Nothing else may arrive until the client shuts down.
        loop {
            match stream.next().await {
                Some(Ok(element)) => {
                    if element.is("r", ns::SM) {
                        let ack: Element =
                            format!("<a xmlns='{}' h='3'/>", ns::SM).parse().unwrap();
                        stream.send(&ack).await.unwrap();
                        continue;
                    }
                    if element.is("presence", ns::JABBER_CLIENT)
                        && element.attr("type") == Some("unavailable")
                    {
                        continue;
                    }
                    if element.is("iq", ns::JABBER_CLIENT)
                        && element
                            .attr("id")
                            .map(|id| id.starts_with(super::PING_PROBE_ID_PREFIX))
                            .unwrap_or(false)
                    {
                        continue;
                    }
                    panic!("unexpected duplicate transmission: {:?}", element);
                }
                Some(Err(ReadError::SoftTimeout)) => continue,
                Some(Err(ReadError::StreamFooterReceived)) | None => break,
                Some(Err(e)) => panic!("server read error: {:?}", e),
            }
        }
    });

    let connector = TestConnector::new([client_io1, client_io2]);
    let mut client =
        Client::new_with_connector(jid, "pencil", connector, Timeouts::default(), true);

    match client.next().await {
        Some(Event::Online { bound_jid, resumed }) => {
            assert_eq!(bound_jid.to_string(), "alice@example.org/gen-1");
            assert!(!resumed);
        }
        other => panic!("expected Online, got {:?}", other),
    }

    let peer = Jid::from_str("peer@example.org").unwrap();
    let mut tokens = Vec::new();
    for body in ["one", "two", "three"] {
        let message = stanzas::message::Message::chat(peer.clone()).with_body(body);
        tokens.push(client.send_stanza(message).await.unwrap());
    }

    // The stream comes back resumed, with the bound JID intact.
    match client.next().await {
        Some(Event::Online { bound_jid, resumed }) => {
            assert_eq!(bound_jid.to_string(), "alice@example.org/gen-1");
            assert!(resumed);
        }
        other => panic!("expected resumed Online, got {:?}", other),
    }

    // All three eventually confirm delivery, each exactly once.
    for token in tokens.iter_mut() {
        match token.wait_for(StanzaStage::Acked).await {
            Some(StanzaState::Acked) => (),
            other => panic!("expected ack, got {:?}", other),
        }
    }

    client.disconnect().await;
    server.await.unwrap();
}
