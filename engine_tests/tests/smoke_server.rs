//! Smoke test: a server with no connected clients runs a few ticks without
//! panicking.

use std::rc::Rc;

use engine_server::GameServer;
use engine_shared::config::EngineConfig;
use engine_shared::net::{LoopbackTransport, Transport};

#[test]
fn server_runs_few_ticks_with_no_clients() {
    let transport: Rc<dyn Transport> = Rc::new(LoopbackTransport::new());
    let mut server = GameServer::new(EngineConfig::default(), transport);

    for _ in 0..3 {
        server.frame();
    }

    assert_eq!(server.connected_slot_count(), 0);
    assert_eq!(server.tick(), 3);
}
