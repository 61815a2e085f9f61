//! Relay integration tests.
//!
//! Drives whole client sessions through the library API: VPN creation and
//! joining, packet routing between members, network isolation, PROXY
//! routing to the server list and to static UDP relays.
//! Everything stays on loopback; no WebSocket transport involved.

use std::net::{IpAddr, Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc::UnboundedReceiver;

use game_relay::vpn::packet::{encode, HEADER_LEN};
use game_relay::vpn::{PacketHeader, SERVER_ADDR};
use game_relay::{ClientSession, Config, Frame, Relay, StaticRelayRule, Target};

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn relay_with(relays: Vec<StaticRelayRule>) -> Arc<Relay> {
    let config = Config {
        relays,
        ..Config::default()
    };
    Arc::new(Relay::new(config).unwrap())
}

fn connect(relay: &Arc<Relay>) -> (ClientSession, UnboundedReceiver<Frame>) {
    relay.open_session(vec!["203.0.113.7".into()])
}

fn expect_text(rx: &mut UnboundedReceiver<Frame>) -> String {
    match rx.try_recv() {
        Ok(Frame::Text(text)) => text,
        other => panic!("expected a text frame, got {other:?}"),
    }
}

fn expect_binary(rx: &mut UnboundedReceiver<Frame>) -> Vec<u8> {
    match rx.try_recv() {
        Ok(Frame::Binary(data)) => data,
        other => panic!("expected a binary frame, got {other:?}"),
    }
}

fn make_vpn(relay: &Arc<Relay>) -> (String, String) {
    let (mut session, mut rx) = connect(relay);
    session.on_frame(Frame::Text("MAKEVPN minetest".into()));
    let reply = expect_text(&mut rx);
    let tokens: Vec<&str> = reply.split(' ').collect();
    assert_eq!(tokens[0], "NEWVPN");
    (tokens[1].to_string(), tokens[2].to_string())
}

fn join(relay: &Arc<Relay>, code: &str, port: u16) -> (ClientSession, UnboundedReceiver<Frame>) {
    let (mut session, mut rx) = connect(relay);
    session.on_frame(Frame::Text(format!("VPN {code} IPV4 UDP 0.0.0.0 {port}")));
    assert_eq!(expect_text(&mut rx), "BIND OK");
    (session, rx)
}

fn vpn_addr(session: &ClientSession) -> SocketAddrV4 {
    match session.target() {
        Some(Target::Vpn(endpoint)) => endpoint.addr(),
        other => panic!("expected a VPN target, got {other:?}"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// VPN
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn host_and_guest_exchange_packets() {
    let relay = relay_with(Vec::new());
    let (server_code, client_code) = make_vpn(&relay);

    let (mut host, mut host_rx) = join(&relay, &server_code, 30000);
    let (mut guest, mut guest_rx) = join(&relay, &client_code, 40000);
    assert_eq!(vpn_addr(&host), SocketAddrV4::new(SERVER_ADDR, 30000));
    let guest_addr = vpn_addr(&guest);
    assert_ne!(*guest_addr.ip(), SERVER_ADDR);

    guest.on_frame(Frame::Binary(encode(vpn_addr(&host), b"TOSERVER")));
    let received = expect_binary(&mut host_rx);
    assert_eq!(PacketHeader::parse(&received).unwrap().addr, guest_addr);
    assert_eq!(&received[HEADER_LEN..], b"TOSERVER");

    host.on_frame(Frame::Binary(encode(guest_addr, b"TOCLIENT")));
    let reply = expect_binary(&mut guest_rx);
    assert_eq!(
        PacketHeader::parse(&reply).unwrap().addr,
        SocketAddrV4::new(SERVER_ADDR, 30000)
    );
    assert_eq!(&reply[HEADER_LEN..], b"TOCLIENT");

    assert!(!host.is_closed());
    assert!(!guest.is_closed());
}

#[test]
fn packets_to_empty_addresses_are_dropped() {
    let relay = relay_with(Vec::new());
    let (_, client_code) = make_vpn(&relay);
    let (mut guest, mut guest_rx) = join(&relay, &client_code, 40000);

    guest.on_frame(Frame::Binary(encode(
        SocketAddrV4::new(SERVER_ADDR, 30000),
        b"nobody home",
    )));
    assert!(guest_rx.try_recv().is_err());
    assert!(!guest.is_closed());
}

#[test]
fn networks_are_isolated() {
    let relay = relay_with(Vec::new());
    let (first, _) = make_vpn(&relay);
    let (_, second_client) = make_vpn(&relay);

    let (_host, mut host_rx) = join(&relay, &first, 30000);
    let (mut stranger, _stranger_rx) = join(&relay, &second_client, 40000);

    stranger.on_frame(Frame::Binary(encode(
        SocketAddrV4::new(SERVER_ADDR, 30000),
        b"hello?",
    )));
    assert!(host_rx.try_recv().is_err());
}

#[test]
fn unknown_code_closes_silently() {
    let relay = relay_with(Vec::new());
    let (mut session, mut rx) = connect(&relay);
    session.on_frame(Frame::Text("VPN 000000000000 IPV4 UDP 0.0.0.0 30000".into()));
    assert!(session.is_closed());
    assert!(rx.try_recv().is_err());
}

#[test]
fn malformed_packet_closes_only_the_sender() {
    let relay = relay_with(Vec::new());
    let (server_code, client_code) = make_vpn(&relay);
    let (host, _host_rx) = join(&relay, &server_code, 30000);
    let (mut guest, _guest_rx) = join(&relay, &client_code, 40000);

    guest.on_frame(Frame::Binary(vec![0xde, 0xad, 0xbe, 0xef]));
    assert!(guest.is_closed());
    assert!(!host.is_closed());

    let network = relay.vpns().lookup(&server_code).unwrap();
    assert_eq!(network.endpoint_count(), 1);
}

#[test]
fn disconnect_frees_the_address() {
    let relay = relay_with(Vec::new());
    let (server_code, _) = make_vpn(&relay);

    let (mut host, _rx) = join(&relay, &server_code, 30000);
    host.close();
    let network = relay.vpns().lookup(&server_code).unwrap();
    assert!(network.route(SERVER_ADDR, 30000).is_none());

    let (replacement, _rx2) = join(&relay, &server_code, 30000);
    assert!(network.route(SERVER_ADDR, 30000).is_some());
    assert!(!replacement.is_closed());
}

// ─────────────────────────────────────────────────────────────────────────────
// PROXY
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn server_list_lists_static_relays() {
    let relay = relay_with(vec![
        StaticRelayRule {
            virtual_ip: Ipv4Addr::new(192, 168, 0, 10),
            real_ip: IpAddr::V4(Ipv4Addr::new(198, 51, 100, 20)),
            real_port: 30000,
        },
        StaticRelayRule {
            virtual_ip: Ipv4Addr::new(192, 168, 0, 11),
            real_ip: IpAddr::V4(Ipv4Addr::new(198, 51, 100, 21)),
            real_port: 30001,
        },
    ]);
    let (mut session, mut rx) = connect(&relay);

    session.on_frame(Frame::Text("PROXY IPV4 TCP 10.0.0.1 8080".into()));
    assert_eq!(expect_text(&mut rx), "PROXY OK");

    session.on_frame(Frame::Binary(
        b"CONNECT servers.minetest.net:80 HTTP/1.1\r\nHost: servers.minetest.net:80\r\n\r\n"
            .to_vec(),
    ));
    let established = String::from_utf8(expect_binary(&mut rx)).unwrap();
    assert!(established.starts_with("HTTP/1.0 200 Connection Established\r\n"));

    session.on_frame(Frame::Binary(
        b"GET /list HTTP/1.1\r\nHost: servers.minetest.net\r\n\r\n".to_vec(),
    ));
    let response = String::from_utf8(expect_binary(&mut rx)).unwrap();
    let (_, body) = response.split_once("\n\n").unwrap();
    let list: serde_json::Value = serde_json::from_str(body.trim_end()).unwrap();
    assert_eq!(list["total"]["servers"], 2);
    assert_eq!(list["list"][0]["address"], "192.168.0.10");
    assert_eq!(list["list"][1]["port"], 30001);
    assert!(!session.is_closed());
}

#[test]
fn connect_to_other_host_closes() {
    let relay = relay_with(Vec::new());
    let (mut session, mut rx) = connect(&relay);
    session.on_frame(Frame::Text("PROXY IPV4 TCP 10.0.0.1 8080".into()));
    assert_eq!(expect_text(&mut rx), "PROXY OK");

    session.on_frame(Frame::Binary(
        b"CONNECT example.com:443 HTTP/1.1\r\n\r\n".to_vec(),
    ));
    assert!(session.is_closed());
    assert!(rx.try_recv().is_err());
}

#[test]
fn unroutable_proxy_fails_but_stays_open() {
    let relay = relay_with(Vec::new());
    let (mut session, mut rx) = connect(&relay);

    session.on_frame(Frame::Text("PROXY IPV4 TCP 10.0.0.2 8080".into()));
    assert_eq!(expect_text(&mut rx), "PROXY FAIL");
    session.on_frame(Frame::Text("PROXY IPV4 UDP 192.168.0.10 30000".into()));
    assert_eq!(expect_text(&mut rx), "PROXY FAIL");

    assert!(!session.is_closed());
    assert!(session.target().is_none());
}

#[tokio::test]
async fn static_relay_round_trip() {
    let game_server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let server_addr = game_server.local_addr().unwrap();
    let relay = relay_with(vec![StaticRelayRule {
        virtual_ip: Ipv4Addr::new(192, 168, 0, 10),
        real_ip: server_addr.ip(),
        real_port: server_addr.port(),
    }]);
    let (mut session, mut rx) = connect(&relay);

    session.on_frame(Frame::Text(format!(
        "PROXY IPV4 UDP 192.168.0.10 {}",
        server_addr.port()
    )));
    assert_eq!(expect_text(&mut rx), "PROXY OK");

    session.on_frame(Frame::Binary(b"ping".to_vec()));
    let mut buf = [0u8; 64];
    let (n, from) = tokio::time::timeout(Duration::from_secs(5), game_server.recv_from(&mut buf))
        .await
        .expect("datagram not relayed")
        .unwrap();
    assert_eq!(&buf[..n], b"ping");

    game_server.send_to(b"pong", from).await.unwrap();
    let frame = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("reply not relayed")
        .unwrap();
    assert_eq!(frame, Frame::Binary(b"pong".to_vec()));

    session.close();
}
