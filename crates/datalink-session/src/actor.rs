//! Local actors and their link identifiers.
//!
//! The peer names actors by link id. An actor keeps one primary id plus any
//! aliases picked up when the peer re-identified it, so old ids keep
//! resolving after a rename or reconnect. Two actors never merge.

use std::fmt;

use datalink_frame::payload::{ActorRef, TemplateActor};
use datalink_frame::ActorKind;
use tracing::{debug, info};

use crate::error::{LinkError, Result};

/// Peer viseme names and the shape keys they drive locally.
const VISEME_TABLE: &[(&str, &str)] = &[
    ("None", "V_None"),
    ("Open", "V_Open"),
    ("Explosive", "V_Explosive"),
    ("Dental_Lip", "V_Dental_Lip"),
    ("Tight_O", "V_Tight_O"),
    ("Tight", "V_Tight"),
    ("Wide", "V_Wide"),
    ("Affricate", "V_Affricate"),
    ("Lip_Open", "V_Lip_Open"),
    ("Tongue_up", "V_Tongue_up"),
    ("Tongue_Raise", "V_Tongue_Raise"),
    ("Tongue_Out", "V_Tongue_Out"),
    ("Tongue_Narrow", "V_Tongue_Narrow"),
    ("Tongue_Lower", "V_Tongue_Lower"),
    ("Tongue_Curl-U", "V_Tongue_Curl_U"),
    ("Tongue_Curl-D", "V_Tongue_Curl_D"),
];

/// Map a peer viseme name to the local shape key. Unknown names pass through.
pub fn remap_viseme(name: &str) -> &str {
    VISEME_TABLE
        .iter()
        .find(|(peer, _)| *peer == name)
        .map_or(name, |(_, local)| *local)
}

/// Stable handle to an actor in an [`ActorDirectory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorId(u32);

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "actor-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: ActorId,
    pub name: String,
    pub kind: ActorKind,
    pub link_id: String,
    pub aliases: Vec<String>,
    pub bones: Vec<String>,
    pub meshes: Vec<String>,
    pub expressions: Vec<String>,
    /// Already remapped to local shape-key names.
    pub visemes: Vec<String>,
    pub morphs: Vec<String>,
}

impl Actor {
    /// True if `link_id` is the primary id or one of the aliases.
    pub fn answers_to(&self, link_id: &str) -> bool {
        self.link_id == link_id || self.aliases.iter().any(|a| a == link_id)
    }

    pub fn to_ref(&self) -> ActorRef {
        ActorRef::new(self.name.clone(), self.kind, self.link_id.clone())
    }

    /// Name tables for an outbound TEMPLATE.
    pub fn to_template(&self) -> TemplateActor {
        TemplateActor {
            name: self.name.clone(),
            kind: self.kind,
            link_id: self.link_id.clone(),
            bones: self.bones.clone(),
            meshes: self.meshes.clone(),
            expressions: self.expressions.clone(),
            visemes: self.visemes.clone(),
            morphs: self.morphs.clone(),
        }
    }
}

/// All actors known to the session.
#[derive(Debug, Default)]
pub struct ActorDirectory {
    actors: Vec<Actor>,
    next_id: u32,
    single_scene: bool,
}

impl ActorDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new actor and return its id.
    pub fn insert(&mut self, name: impl Into<String>, kind: ActorKind, link_id: impl Into<String>) -> ActorId {
        self.next_id += 1;
        let id = ActorId(self.next_id);
        let actor = Actor {
            id,
            name: name.into(),
            kind,
            link_id: link_id.into(),
            aliases: Vec::new(),
            bones: Vec::new(),
            meshes: Vec::new(),
            expressions: Vec::new(),
            visemes: Vec::new(),
            morphs: Vec::new(),
        };
        debug!(%id, name = %actor.name, link_id = %actor.link_id, kind = %kind, "actor registered");
        self.actors.push(actor);
        id
    }

    pub fn get(&self, id: ActorId) -> Option<&Actor> {
        self.actors.iter().find(|a| a.id == id)
    }

    pub fn get_mut(&mut self, id: ActorId) -> Option<&mut Actor> {
        self.actors.iter_mut().find(|a| a.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Actor> {
        self.actors.iter()
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }

    /// Forget an actor after local deletion.
    pub fn remove(&mut self, id: ActorId) -> Option<Actor> {
        let index = self.actors.iter().position(|a| a.id == id)?;
        Some(self.actors.remove(index))
    }

    /// Peer hosts one character per scene; unknown avatars fall back to ours.
    pub fn set_single_scene(&mut self, single_scene: bool) {
        self.single_scene = single_scene;
    }

    pub fn single_scene(&self) -> bool {
        self.single_scene
    }

    /// Find the local actor the peer means.
    ///
    /// 1. exact primary id or alias;
    /// 2. name match (kind-filtered when hinted), recording `link_id` as an alias;
    /// 3. in single-scene mode, an avatar hint resolves to the first local avatar.
    pub fn resolve(
        &mut self,
        link_id: &str,
        name_hint: Option<&str>,
        kind_hint: Option<ActorKind>,
    ) -> Option<ActorId> {
        if let Some(actor) = self.actors.iter().find(|a| a.answers_to(link_id)) {
            return Some(actor.id);
        }

        if let Some(name) = name_hint {
            let found = self.actors.iter_mut().find(|a| {
                a.name == name && kind_hint.is_none_or(|kind| kind == a.kind)
            });
            if let Some(actor) = found {
                if !link_id.is_empty() && !actor.answers_to(link_id) {
                    info!(actor = %actor.name, alias = %link_id, "recording link id alias");
                    actor.aliases.push(link_id.to_string());
                }
                return Some(actor.id);
            }
        }

        if self.single_scene && kind_hint == Some(ActorKind::Avatar) {
            if let Some(actor) = self.actors.iter().find(|a| a.kind == ActorKind::Avatar) {
                debug!(actor = %actor.name, requested = %link_id, "single-scene avatar fallback");
                return Some(actor.id);
            }
        }

        None
    }

    /// Resolve an identity triple from a meta payload.
    pub fn resolve_ref(&mut self, actor: &ActorRef) -> Option<ActorId> {
        self.resolve(&actor.link_id, Some(&actor.name), Some(actor.kind))
    }

    /// Like [`resolve`](Self::resolve) but reports a miss as `ActorNotFound`.
    pub fn require(&mut self, link_id: &str, name: &str, kind: ActorKind) -> Result<ActorId> {
        self.resolve(link_id, Some(name), Some(kind))
            .ok_or_else(|| LinkError::ActorNotFound {
                name: name.to_string(),
                link_id: link_id.to_string(),
            })
    }

    /// Give an actor a new name and primary id. Aliases are kept.
    pub fn rename(&mut self, id: ActorId, new_name: &str, new_link_id: &str) -> Result<()> {
        let actor = self.get_mut(id).ok_or_else(|| LinkError::ActorNotFound {
            name: new_name.to_string(),
            link_id: new_link_id.to_string(),
        })?;
        info!(
            from = %actor.name,
            to = %new_name,
            link_id = %new_link_id,
            "actor renamed"
        );
        actor.name = new_name.to_string();
        actor.link_id = new_link_id.to_string();
        Ok(())
    }

    /// Create or update an actor from a TEMPLATE entry.
    pub fn apply_template(&mut self, entry: &TemplateActor) -> ActorId {
        let id = match self.resolve(&entry.link_id, Some(&entry.name), Some(entry.kind)) {
            Some(id) => id,
            None => self.insert(entry.name.clone(), entry.kind, entry.link_id.clone()),
        };
        if let Some(actor) = self.get_mut(id) {
            actor.bones = entry.bones.clone();
            actor.meshes = entry.meshes.clone();
            actor.expressions = entry.expressions.clone();
            actor.visemes = entry
                .visemes
                .iter()
                .map(|v| remap_viseme(v).to_string())
                .collect();
            actor.morphs = entry.morphs.clone();
        }
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> (ActorDirectory, ActorId, ActorId) {
        let mut dir = ActorDirectory::new();
        let kevin = dir.insert("Kevin", ActorKind::Avatar, "LINK-K");
        let chair = dir.insert("Chair", ActorKind::Prop, "LINK-C");
        (dir, kevin, chair)
    }

    #[test]
    fn resolves_by_primary_id() {
        let (mut dir, kevin, chair) = directory();
        assert_eq!(dir.resolve("LINK-K", None, None), Some(kevin));
        assert_eq!(dir.resolve("LINK-C", Some("ignored"), None), Some(chair));
    }

    #[test]
    fn name_hint_records_alias_once() {
        let (mut dir, kevin, _) = directory();

        assert_eq!(dir.resolve("NEW-ID", Some("Kevin"), Some(ActorKind::Avatar)), Some(kevin));
        assert_eq!(dir.resolve("NEW-ID", Some("Kevin"), Some(ActorKind::Avatar)), Some(kevin));

        let actor = dir.get(kevin).unwrap();
        assert_eq!(actor.link_id, "LINK-K");
        assert_eq!(actor.aliases, vec!["NEW-ID".to_string()]);
        // The alias now resolves on its own.
        assert_eq!(dir.resolve("NEW-ID", None, None), Some(kevin));
    }

    #[test]
    fn kind_hint_filters_name_match() {
        let (mut dir, _, _) = directory();
        assert_eq!(dir.resolve("X", Some("Kevin"), Some(ActorKind::Prop)), None);
        assert!(dir.iter().all(|a| a.aliases.is_empty()));
    }

    #[test]
    fn name_match_is_case_sensitive() {
        let (mut dir, _, _) = directory();
        assert_eq!(dir.resolve("X", Some("kevin"), None), None);
    }

    #[test]
    fn single_scene_avatar_fallback() {
        let (mut dir, kevin, _) = directory();
        assert_eq!(dir.resolve("CC-ID", Some("Camila"), Some(ActorKind::Avatar)), None);

        dir.set_single_scene(true);
        assert_eq!(
            dir.resolve("CC-ID", Some("Camila"), Some(ActorKind::Avatar)),
            Some(kevin)
        );
        assert_eq!(dir.resolve("CC-ID", Some("Camila"), Some(ActorKind::Prop)), None);
        assert!(dir.get(kevin).unwrap().aliases.is_empty());
    }

    #[test]
    fn unknown_actor_is_not_found() {
        let (mut dir, _, _) = directory();
        let err = dir.require("NOPE", "Nobody", ActorKind::Avatar).unwrap_err();
        assert!(matches!(err, LinkError::ActorNotFound { .. }));
    }

    #[test]
    fn rename_keeps_aliases_and_ids_never_merge() {
        let (mut dir, kevin, chair) = directory();
        dir.resolve("OLD-ALIAS", Some("Kevin"), None);

        dir.rename(kevin, "Kevin v2", "LINK-K2").unwrap();
        let actor = dir.get(kevin).unwrap();
        assert_eq!(actor.name, "Kevin v2");
        assert_eq!(actor.link_id, "LINK-K2");
        assert_eq!(actor.aliases, vec!["OLD-ALIAS".to_string()]);

        assert_eq!(dir.resolve("OLD-ALIAS", None, None), Some(kevin));
        assert_eq!(dir.resolve("LINK-C", None, None), Some(chair));
        assert_eq!(dir.len(), 2);
    }

    #[test]
    fn template_creates_then_updates() {
        let mut dir = ActorDirectory::new();
        let entry = TemplateActor {
            name: "Camila".into(),
            kind: ActorKind::Avatar,
            link_id: "LINK-1".into(),
            bones: vec!["root".into(), "hip".into()],
            meshes: vec!["Body".into()],
            expressions: vec!["Brow_Raise_L".into()],
            visemes: vec!["Open".into(), "Custom".into()],
            morphs: vec![],
        };
        let id = dir.apply_template(&entry);
        let actor = dir.get(id).unwrap();
        assert_eq!(actor.bones.len(), 2);
        assert_eq!(actor.visemes, vec!["V_Open".to_string(), "Custom".to_string()]);

        let updated = TemplateActor {
            bones: vec!["root".into()],
            ..entry
        };
        assert_eq!(dir.apply_template(&updated), id);
        assert_eq!(dir.get(id).unwrap().bones, vec!["root".to_string()]);
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn remove_forgets_actor() {
        let (mut dir, kevin, _) = directory();
        assert_eq!(dir.remove(kevin).unwrap().name, "Kevin");
        assert_eq!(dir.resolve("LINK-K", None, None), None);
        assert!(dir.remove(kevin).is_none());
    }
}
