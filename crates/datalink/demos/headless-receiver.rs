//! Headless receiver: listens for one peer and reports what it sends.
//!
//! Run with:
//!   cargo run --example headless-receiver
//!
//! In another terminal:
//!   cargo run --example stream-sequence
//!
//! The receiver exits once the first peer leaves.

use datalink::session::{LinkConfig, LinkEvent, MemoryScene, RolePolicy, Session};
use datalink::transport::LISTEN_PORT;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = LinkConfig::default()
        .with_role(RolePolicy::ServerOnly)
        .with_listen_port(LISTEN_PORT);

    let mut session = Session::new(config, MemoryScene::new()).with_observer(|event: LinkEvent| {
        if !matches!(event, LinkEvent::Sent { .. }) {
            eprintln!("{:<10} {}", event.kind(), event.detail());
        }
    });
    session.listen()?;
    eprintln!("Listening on {:?}", session.local_addr());

    let mut linked = false;
    loop {
        let wait = session.tick();
        linked |= session.is_connected();
        if linked && !session.is_connected() {
            break;
        }
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }
    }

    for actor in session.directory().iter() {
        eprintln!(
            "actor {} ({}) link_id={} bones={}",
            actor.name,
            actor.kind,
            actor.link_id,
            actor.bones.len()
        );
    }
    for action in session.scene().action_names() {
        eprintln!("action {action}");
    }
    Ok(())
}
