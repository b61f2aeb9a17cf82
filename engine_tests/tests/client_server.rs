//! End-to-end scenarios from spec §8, driven over the in-process loopback
//! transport so every frame is deterministic and needs no sleeping.

use std::cell::Cell;
use std::rc::Rc;

use engine_client::{GameClient, InputEvent, NullRenderer};
use engine_server::server::SlotState;
use engine_server::GameServer;
use engine_shared::config::EngineConfig;
use engine_shared::math::{Quat, Vec3};
use engine_shared::net::test_support::LossyTransport;
use engine_shared::net::{Channel, LoopbackTransport, MsgType, NetAddr, NetSrc, PacketBuffer, Transport};
use engine_shared::protocol::OobMessage;

/// Drives `client`/`server` frames alternately until the client's top state
/// reports `"connected"`, or panics after a generous iteration budget.
fn drive_to_connected(client: &mut GameClient, server: &mut GameServer) {
    for _ in 0..64 {
        client.frame();
        server.frame();
        if client.state_name() == "connected" {
            return;
        }
    }
    panic!("client never reached Connected (state={})", client.state_name());
}

/// Scenario A — happy handshake: client reaches Connected with a combined
/// salt that's the XOR of the two handshake salts, and the server has
/// exactly one Connected slot.
#[test]
fn happy_handshake_reaches_connected() {
    let transport: Rc<dyn Transport> = Rc::new(LoopbackTransport::new());
    let mut server = GameServer::new(EngineConfig::default(), transport.clone());
    let mut client = GameClient::new(&EngineConfig::default(), transport, Box::new(NullRenderer));

    client.handle_input(InputEvent::Enter); // Menu -> push Connecting
    drive_to_connected(&mut client, &mut server);

    assert_eq!(server.connected_slot_count(), 1);
    assert_eq!(server.slot_state(0), Some(SlotState::Connected));
    assert_ne!(client.combined_salt(), 0);
}

/// Scenario B — no room: a single-slot server already has one Connected
/// client; a second `client_connect` gets exactly one `server_noroom` reply.
#[test]
fn no_room_reply_for_second_client() {
    let transport: Rc<dyn Transport> = Rc::new(LoopbackTransport::new());
    let mut server = GameServer::new(
        EngineConfig {
            max_clients: 1,
            ..EngineConfig::default()
        },
        transport.clone(),
    );
    let mut client = GameClient::new(&EngineConfig::default(), transport.clone(), Box::new(NullRenderer));

    client.handle_input(InputEvent::Enter);
    drive_to_connected(&mut client, &mut server);
    assert_eq!(server.connected_slot_count(), 1);

    // A second, independent connect attempt finds the single slot taken.
    let mut out = PacketBuffer::new();
    OobMessage::ClientConnect { client_salt: 0x2222_2222 }.serialize(&mut out);
    Channel::send_out_of_band(transport.as_ref(), NetSrc::Client, NetAddr::SERVER, out.data());
    server.frame();

    let (mut buf, _from) = transport.recv(NetSrc::Client).expect("reply to second client_connect");
    let mut magic = 0u16;
    assert!(buf.read_u16(&mut magic));
    assert_eq!(OobMessage::parse(&mut buf), Some(OobMessage::ServerNoRoom));
}

/// Entity replication: global entities the server allocates while a client
/// is Connected arrive as reliable `CreateEntity`s, and freeing one arrives
/// as a reliable `DestroyEntity`.
#[test]
fn entity_create_and_destroy_replicate_to_connected_client() {
    let transport: Rc<dyn Transport> = Rc::new(LoopbackTransport::new());
    let mut server = GameServer::new(EngineConfig::default(), transport.clone());
    let mut client = GameClient::new(&EngineConfig::default(), transport, Box::new(NullRenderer));

    client.handle_input(InputEvent::Enter);
    drive_to_connected(&mut client, &mut server);

    let id = server
        .alloc_global(Vec3::new(1.0, 2.0, 3.0), Quat::default(), "tank")
        .expect("slot available for a new global entity");

    for _ in 0..8 {
        server.frame();
        client.frame();
        if client.store().exists(id) {
            break;
        }
    }
    assert!(client.store().exists(id), "CreateEntity never arrived");
    let replicated = client.store().get_global(id).expect("entity present");
    assert_eq!(replicated.model_name, "tank");
    assert!((replicated.position.x - 1.0).abs() < 0.001);

    server.free_global(id);
    for _ in 0..8 {
        server.frame();
        client.frame();
        if !client.store().exists(id) {
            break;
        }
    }
    assert!(!client.store().exists(id), "DestroyEntity never arrived");
}

/// Scenario E — escape-to-disconnect: the client fires three
/// `client_disconnect` datagrams back-to-back; the server frees the slot on
/// the first and ignores the rest.
#[test]
fn escape_sends_three_disconnects_server_frees_once() {
    let transport: Rc<dyn Transport> = Rc::new(LoopbackTransport::new());
    let mut server = GameServer::new(EngineConfig::default(), transport.clone());
    let mut client = GameClient::new(&EngineConfig::default(), transport, Box::new(NullRenderer));

    client.handle_input(InputEvent::Enter);
    drive_to_connected(&mut client, &mut server);
    assert_eq!(server.connected_slot_count(), 1);

    client.handle_input(InputEvent::Escape);
    server.frame();

    assert_eq!(server.connected_slot_count(), 0);
    assert_eq!(server.slot_state(0), Some(SlotState::Free));
}

/// Scenario F — salt rejection: a well-formed framed datagram with the
/// wrong salt is dropped, and the real Connected client is unaffected.
#[test]
fn wrong_salt_framed_packet_is_dropped() {
    let transport: Rc<dyn Transport> = Rc::new(LoopbackTransport::new());
    let mut server = GameServer::new(EngineConfig::default(), transport.clone());
    let mut client = GameClient::new(&EngineConfig::default(), transport.clone(), Box::new(NullRenderer));

    client.handle_input(InputEvent::Enter);
    drive_to_connected(&mut client, &mut server);

    let mut spoofed = Channel::with_peer(NetSrc::Client, NetAddr::SERVER);
    assert!(spoofed.send_unreliable(transport.as_ref(), MsgType::PlayerCommand, &[], 0));
    server.frame();

    // The legitimate session is untouched.
    assert_eq!(server.slot_state(0), Some(SlotState::Connected));
    assert_eq!(server.connected_slot_count(), 1);
}

/// Scenario D — duplicate suppression: a transport that duplicates every
/// datagram still only delivers each reliable payload once.
struct DuplicatingTransport {
    inner: LoopbackTransport,
}

impl Transport for DuplicatingTransport {
    fn send(&self, src: NetSrc, data: &[u8], dst: NetAddr) -> bool {
        self.inner.send(src, data, dst);
        self.inner.send(src, data, dst)
    }

    fn recv(&self, src: NetSrc) -> Option<(PacketBuffer, NetAddr)> {
        self.inner.recv(src)
    }
}

#[test]
fn duplicated_datagrams_deliver_reliable_exactly_once() {
    let transport = DuplicatingTransport {
        inner: LoopbackTransport::new(),
    };
    let mut a = Channel::with_peer(NetSrc::Client, NetAddr::Loopback { port: 0 });
    let mut b = Channel::with_peer(NetSrc::Server, NetAddr::Loopback { port: 7 });

    a.add_reliable(MsgType::CreateEntity, &[9]);
    a.try_send_reliable(&transport, 1);

    let mut delivered = Vec::new();
    while let Some((mut buf, _from)) = transport.recv(NetSrc::Server) {
        let mut magic = 0u16;
        assert!(buf.read_u16(&mut magic));
        if let Some(received) = b.process_header(&mut buf, 1) {
            delivered.extend(received.reliables.into_iter().map(|r| r.payload));
        }
    }

    assert_eq!(delivered, vec![vec![9u8]]);
}

/// Scenario C — reliable delivery under loss: with every second datagram in
/// either direction dropped, every reliable payload still arrives exactly
/// once and in ascending order, and every outgoing slot eventually shows
/// `acked`.
#[test]
fn reliable_messages_survive_fifty_percent_loss() {
    let transport = LossyTransport::new(2);
    let mut a = Channel::with_peer(NetSrc::Client, NetAddr::Loopback { port: 0 });
    let mut b = Channel::with_peer(NetSrc::Server, NetAddr::Loopback { port: 7 });

    a.add_reliable(MsgType::CreateEntity, &[0]);
    a.add_reliable(MsgType::CreateEntity, &[1]);

    let mut delivered_to_b: Vec<u8> = Vec::new();
    let got_both = Cell::new(false);

    for _ in 0..60 {
        a.try_send_reliable(&transport, 1);
        while let Some((mut buf, _from)) = transport.recv(NetSrc::Server) {
            let mut magic = 0u16;
            if !buf.read_u16(&mut magic) {
                continue;
            }
            if let Some(received) = b.process_header(&mut buf, 1) {
                for rel in received.reliables {
                    delivered_to_b.push(rel.payload[0]);
                }
            }
        }
        b.try_send_reliable(&transport, 1);
        while let Some((mut buf, _from)) = transport.recv(NetSrc::Client) {
            let mut magic = 0u16;
            if !buf.read_u16(&mut magic) {
                continue;
            }
            a.process_header(&mut buf, 1);
        }
        if delivered_to_b.len() >= 2 {
            got_both.set(true);
            break;
        }
    }

    assert!(got_both.get(), "both reliables should arrive within 60 frames");
    assert_eq!(delivered_to_b, vec![0, 1], "delivered out of order or duplicated");
}

/// Invariant 5 — ack feedback loop idempotence: on a lossless link, once B
/// has sent one datagram back to A after receiving A's reliables, every
/// sequence A queued shows `acked`.
#[test]
fn ack_feedback_marks_outgoing_ring_acked() {
    let transport = LoopbackTransport::new();
    let mut a = Channel::with_peer(NetSrc::Client, NetAddr::Loopback { port: 0 });
    let mut b = Channel::with_peer(NetSrc::Server, NetAddr::Loopback { port: 7 });

    a.add_reliable(MsgType::CreateEntity, &[0]);
    a.add_reliable(MsgType::CreateEntity, &[1]);
    a.try_send_reliable(&transport, 1);

    let (mut buf, _from) = transport.recv(NetSrc::Server).expect("A's carrier arrives");
    let mut magic = 0u16;
    assert!(buf.read_u16(&mut magic));
    let received = b.process_header(&mut buf, 1).expect("valid frame");
    assert_eq!(received.reliables.len(), 2);

    // B has nothing of its own queued, but any outgoing traffic carries the
    // ack bits — simulate B's normal per-tick unreliable send.
    assert!(b.send_unreliable(&transport, MsgType::EntitySynchronize, &[], 1));

    let (mut buf, _from) = transport.recv(NetSrc::Client).expect("B's ack-bearing reply arrives");
    let mut magic = 0u16;
    assert!(buf.read_u16(&mut magic));
    a.process_header(&mut buf, 1).expect("valid frame");

    assert!(a.out_acked(1));
    assert!(a.out_acked(2));
}
