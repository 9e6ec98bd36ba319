use std::fmt;

use datalink_frame::payload::Hello;

use crate::config::{LinkConfig, LocalIdentity};
use crate::error::{LinkError, Result};

const MAX_APPLICATION_LEN: usize = 128;
const MAX_PATH_LEN: usize = 4096;
const MAX_PLUGIN_LEN: usize = 64;

/// Identity of the application on the other end, taken from its HELLO.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteIdentity {
    pub application: String,
    pub version: [u32; 3],
    pub path: String,
    pub exe: String,
    pub plugin: Option<String>,
    /// The peer hosts a single character per scene.
    pub single_scene: bool,
}

impl RemoteIdentity {
    pub fn version_string(&self) -> String {
        let [major, minor, patch] = self.version;
        format!("{major}.{minor}.{patch}")
    }
}

impl fmt::Debug for RemoteIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteIdentity")
            .field("application", &self.application)
            .field("version", &self.version_string())
            .field("path", &self.path)
            .field("single_scene", &self.single_scene)
            .finish()
    }
}

/// The HELLO payload announcing `identity`.
pub fn local_hello(identity: &LocalIdentity) -> Hello {
    Hello {
        application: identity.application.clone(),
        version: identity.version,
        path: identity.path.clone(),
        exe: identity.exe.clone(),
        plugin: identity.plugin.clone(),
    }
}

/// Validate a received HELLO and derive the remote identity.
pub fn accept_hello(hello: Hello, config: &LinkConfig) -> Result<RemoteIdentity> {
    validate_application(&hello.application)?;
    validate_path("path", &hello.path)?;
    validate_path("exe", &hello.exe)?;
    if let Some(plugin) = &hello.plugin {
        if plugin.len() > MAX_PLUGIN_LEN {
            return Err(LinkError::HandshakeFailed(format!(
                "invalid plugin version length: {}",
                plugin.len()
            )));
        }
    }

    let single_scene = config.is_single_scene_app(&hello.application);
    Ok(RemoteIdentity {
        application: hello.application,
        version: hello.version,
        path: hello.path,
        exe: hello.exe,
        plugin: hello.plugin,
        single_scene,
    })
}

fn validate_application(application: &str) -> Result<()> {
    if application.trim().is_empty() || application.len() > MAX_APPLICATION_LEN {
        return Err(LinkError::HandshakeFailed(format!(
            "invalid application name length: {}",
            application.len()
        )));
    }
    Ok(())
}

fn validate_path(field: &str, path: &str) -> Result<()> {
    if path.len() > MAX_PATH_LEN {
        return Err(LinkError::HandshakeFailed(format!(
            "invalid {field} length: {}",
            path.len()
        )));
    }
    if path.contains('\0') {
        return Err(LinkError::HandshakeFailed(format!(
            "{field} contains a NUL byte"
        )));
    }
    Ok(())
}
