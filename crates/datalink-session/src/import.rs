//! Deferred imports.
//!
//! CHARACTER, PROP and MORPH messages ask the host to load files from disk,
//! which can take seconds. The router only queues them; the session runs at
//! most one per tick so the link keeps draining in between.

use datalink_frame::payload::{ActorExport, MorphExport};
use datalink_frame::ActorKind;
use tracing::info;

use crate::actor::{ActorDirectory, ActorId};
use crate::error::{LinkError, Result};
use crate::scene::Scene;

#[derive(Debug, Clone, PartialEq)]
pub enum PendingImport {
    Actor(ActorExport),
    Morph(MorphExport),
}

impl PendingImport {
    pub fn path(&self) -> &str {
        match self {
            PendingImport::Actor(request) => &request.path,
            PendingImport::Morph(request) => &request.path,
        }
    }
}

/// Run one queued import against the scene and directory.
pub fn run_import<S: Scene>(
    import: &PendingImport,
    scene: &mut S,
    directory: &mut ActorDirectory,
) -> Result<ActorId> {
    match import {
        PendingImport::Actor(request) => {
            let mut template = scene.import_character(request)?;
            // The peer's id wins over whatever the imported file carried.
            template.link_id.clone_from(&request.link_id);
            let id = directory.apply_template(&template);
            info!(
                name = %request.name,
                kind = %request.kind,
                path = %request.path,
                "actor imported"
            );
            Ok(id)
        }
        PendingImport::Morph(request) => {
            let id = directory
                .resolve(&request.link_id, Some(&request.name), Some(ActorKind::Avatar))
                .ok_or_else(|| LinkError::ActorNotFound {
                    name: request.name.clone(),
                    link_id: request.link_id.clone(),
                })?;
            let actor = directory
                .get(id)
                .ok_or_else(|| LinkError::Scene(format!("actor {id} vanished")))?;
            scene.import_morph(actor, request)?;
            if let Some(actor) = directory.get_mut(id) {
                if !actor.morphs.contains(&request.morph_name) {
                    actor.morphs.push(request.morph_name.clone());
                }
            }
            info!(actor = %request.name, morph = %request.morph_name, "morph imported");
            Ok(id)
        }
    }
}
