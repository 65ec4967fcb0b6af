//! Two complete stacks talking over a real socket: a request leaves the
//! client's application layer, descends through all seven layers, crosses
//! the medium, climbs the server's stack, and the response makes the same
//! trip back.

use osi_core::layers::application::{HttpRequest, HttpResponse};
use osi_core::layers::network::Ipv4Address;
use osi_core::utility::Endpoint;
use osi_core::{Role, Stack};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const RECEIVE_TIMEOUT: Duration = Duration::from_secs(10);

#[test]
fn echo_request_crosses_two_full_stacks() -> anyhow::Result<()> {
    let server = Stack::build(Role::Server, "127.0.0.1", 0);
    let address = server.physical().bind()?;
    server.application().add_route(
        "/echo",
        Arc::new(|request| {
            HttpResponse::new(200, "OK")
                .with_header("Content-Type", "text/plain")
                .with_body(request.body.clone())
        }),
    );

    let server_thread = thread::spawn(move || -> anyhow::Result<Stack> {
        server.physical().initialize()?;
        server.physical().set_read_timeout(Some(RECEIVE_TIMEOUT))?;
        // The client's opening handshake, the session CONNECT, and the
        // request itself each arrive as one framed unit
        for _ in 0..3 {
            assert!(server.physical().receive()?);
        }
        Ok(server)
    });

    let client = Stack::build(Role::Client, "127.0.0.1", address.port());
    client.physical().initialize()?;
    client.physical().set_read_timeout(Some(RECEIVE_TIMEOUT))?;
    client
        .application()
        .set_remote(Endpoint::new(Ipv4Address::LOCALHOST, address.port()));

    let responses: Arc<Mutex<Vec<HttpResponse>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = responses.clone();
    client.application().send_request(
        HttpRequest::new("POST", "/echo")
            .with_header("Content-Type", "text/plain")
            .with_body("Hello, layered world!"),
        Some(Box::new(move |response| {
            sink.lock().unwrap().push(response.clone());
        })),
    );

    // The server answers with its half of the handshake, an acknowledgment
    // and CONNECT_ACK for the session opening, and an acknowledgment and
    // payload for the request
    for _ in 0..5 {
        assert!(client.physical().receive()?);
    }

    let server = server_thread.join().expect("server thread panicked")?;

    let responses = responses.lock().unwrap();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].status_code, 200);
    assert_eq!(responses[0].body, "Hello, layered world!");

    // Both sides agree one session exists
    assert_eq!(client.session().session_count(), 1);
    assert_eq!(server.session().session_count(), 1);

    client.physical().close();
    Ok(())
}

#[test]
fn session_teardown_crosses_the_wire() -> anyhow::Result<()> {
    let server = Stack::build(Role::Server, "127.0.0.1", 0);
    let address = server.physical().bind()?;

    let server_thread = thread::spawn(move || -> anyhow::Result<Stack> {
        server.physical().initialize()?;
        server.physical().set_read_timeout(Some(RECEIVE_TIMEOUT))?;
        // Handshake, session CONNECT, then the DISCONNECT
        for _ in 0..3 {
            assert!(server.physical().receive()?);
        }
        Ok(server)
    });

    let client = Stack::build(Role::Client, "127.0.0.1", address.port());
    client.physical().initialize()?;
    client.physical().set_read_timeout(Some(RECEIVE_TIMEOUT))?;

    let session_id = client
        .session()
        .establish_session(Endpoint::new(Ipv4Address::LOCALHOST, address.port()));
    assert!(client.session().session(&session_id).unwrap().is_established());

    // Drain the server's handshake reply and CONNECT_ACK before closing
    for _ in 0..3 {
        assert!(client.physical().receive()?);
    }

    client.session().close_session(&session_id);
    assert_eq!(client.session().session_count(), 0);

    let server = server_thread.join().expect("server thread panicked")?;
    assert_eq!(server.session().session_count(), 0);

    client.physical().close();
    Ok(())
}
