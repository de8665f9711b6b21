//! The login connection type driven by a real client.

use mnet_client::GameClient;
use mnet_core::{opcode, ByteWriter, XorStreamCipher};
use mnet_server::{login, ListenerConfig, ServerState, SessionState};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(5);

fn config() -> ListenerConfig {
    ListenerConfig {
        bind: [127, 0, 0, 1].into(),
        port: 0,
        ..Default::default()
    }
}

async fn wait_for(mut check: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !check() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached");
}

#[tokio::test(flavor = "multi_thread")]
async fn version_check_promotes_and_heartbeat_echoes() {
    let server = login::server(config(), Arc::new(XorStreamCipher::new())).unwrap();
    let listener = server.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();
    let task = tokio::spawn(server.clone().serve(listener));

    let mut client = GameClient::connect(addr, &XorStreamCipher::new()).await.unwrap();
    let version = client.handshake().version;
    let mut packet = ByteWriter::of(opcode::RESPONSE_VERSION);
    packet.write_u32(version);
    client.send(packet.as_slice()).await.unwrap();

    let reply = timeout(WAIT, client.recv()).await.unwrap().unwrap().unwrap();
    assert_eq!(reply.opcode(), opcode::REQUEST_LOGIN);
    assert_eq!(server.registry().connected_count(), 1);
    let session = server.registry().connected().remove(0);
    assert_eq!(session.state(), SessionState::Connected);

    let mut heartbeat = ByteWriter::of(opcode::RESPONSE_HEARTBEAT);
    heartbeat.write_u32(0xABCD);
    client.send(heartbeat.as_slice()).await.unwrap();
    let echo = timeout(WAIT, client.recv()).await.unwrap().unwrap().unwrap();
    assert_eq!(echo.opcode(), opcode::REQUEST_HEARTBEAT);
    assert_eq!(echo.reader().read_u32().unwrap(), 0xABCD);

    server.stop();
    task.await.unwrap().unwrap();
    let notice = timeout(WAIT, client.recv()).await.unwrap().unwrap().unwrap();
    assert_eq!(notice.opcode(), opcode::NOTICE_DISCONNECT);
    assert_eq!(notice.reader().read_string().unwrap(), login::STOP_NOTICE);
    assert_eq!(server.state(), ServerState::Stopped);
}

#[tokio::test(flavor = "multi_thread")]
async fn wrong_version_is_disconnected() {
    let server = login::server(config(), Arc::new(XorStreamCipher::new())).unwrap();
    let listener = server.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();
    let task = tokio::spawn(server.clone().serve(listener));

    let mut client = GameClient::connect(addr, &XorStreamCipher::new()).await.unwrap();
    let mut packet = ByteWriter::of(opcode::RESPONSE_VERSION);
    packet.write_u32(client.handshake().version + 1);
    client.send(packet.as_slice()).await.unwrap();

    let end = timeout(WAIT, client.recv()).await.unwrap();
    assert!(matches!(end, Ok(None) | Err(_)));
    wait_for(|| server.registry().is_empty()).await;
    assert_eq!(server.registry().connected_count(), 0);

    server.stop();
    task.await.unwrap().unwrap();
}
