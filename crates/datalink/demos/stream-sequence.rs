//! Streams a short sequence to a listening peer, then disconnects.
//!
//! Run with:
//!   cargo run --example headless-receiver
//!
//! In another terminal:
//!   cargo run --example stream-sequence

use datalink::frame::payload::TemplateActor;
use datalink::frame::ActorKind;
use datalink::session::{LinkConfig, MemoryScene, RolePolicy, Scene, Session};
use datalink::transport::LISTEN_PORT;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = LinkConfig::default()
        .with_role(RolePolicy::ClientOnly)
        .with_port(LISTEN_PORT)
        .with_adaptive_rate(true);

    let template = TemplateActor {
        name: "Camila".into(),
        kind: ActorKind::Avatar,
        link_id: "DEMO-CAMILA".into(),
        bones: vec!["root".into(), "hip".into(), "spine".into()],
        meshes: vec!["Body".into()],
        expressions: vec!["Smile".into(), "Blink_L".into()],
        visemes: vec!["Open".into()],
        morphs: vec![],
    };

    let mut scene = MemoryScene::new();
    scene.add_character(&template);
    let mut session = Session::new(config, scene);
    session.scene_mut().set_timeline(30.0, 1, 90);
    let id = session.directory_mut().apply_template(&template);

    session.connect()?;
    while !session.is_connected() {
        let wait = session.tick();
        if !session.is_active() {
            return Err("peer went away before the handshake".into());
        }
        std::thread::sleep(wait);
    }
    eprintln!("Connected to {:?}", session.remote().map(|r| &r.application));

    session.start_sequence(&[id])?;
    let mut ack_rate = 30.0;
    while session.sequence().is_sending() {
        let wait = session.tick();
        if let Some(rate) = session.sequence().ack_rate() {
            ack_rate = rate;
        }
        if !session.is_connected() {
            return Err("link lost mid-sequence".into());
        }
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }
    }
    eprintln!("Sequence sent, peer acknowledged at {ack_rate:.1} fps");

    session.send_notify("Sequence demo finished")?;
    session.disconnect();
    Ok(())
}
