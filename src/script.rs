//! Scene scripts: recorded surface events replayed against a [`Surface`].
//!
//! A script is YAML:
//!
//! ```yaml
//! name: battery and bulb
//! events:
//!   - event: add_program
//!     program: battery
//!     root: true
//!     components:
//!       voltage: 9
//!   - event: add_program
//!     program: bulb
//!   - event: adjacent
//!     parent: battery
//!     child: bulb
//!   - event: update
//!     program: battery
//!     component: voltage
//!     value: 4.5
//!   - event: separated
//!     parent: battery
//!     child: bulb
//!   - event: remove_program
//!     program: bulb
//! ```
//!
//! Component values are plain YAML and are converted with
//! [`ModelValue::from_json`].

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::model::ModelValue;
use crate::surface::{Surface, SurfaceError};

/// Errors raised while loading a script.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One recorded surface event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScriptEvent {
    AddProgram {
        program: String,
        #[serde(default)]
        root: bool,
        #[serde(default)]
        components: BTreeMap<String, Value>,
    },
    Update {
        program: String,
        component: String,
        value: Value,
    },
    RemoveProgram {
        program: String,
    },
    Adjacent {
        parent: String,
        child: String,
    },
    Separated {
        parent: String,
        child: String,
    },
}

impl std::fmt::Display for ScriptEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScriptEvent::AddProgram { program, .. } => write!(f, "add_program {}", program),
            ScriptEvent::Update {
                program, component, ..
            } => write!(f, "update {}.{}", program, component),
            ScriptEvent::RemoveProgram { program } => write!(f, "remove_program {}", program),
            ScriptEvent::Adjacent { parent, child } => write!(f, "adjacent {} -> {}", parent, child),
            ScriptEvent::Separated { parent, child } => write!(f, "separated {} -/- {}", parent, child),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Script {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub events: Vec<ScriptEvent>,
}

impl Script {
    pub fn from_yaml(yaml: &str) -> Result<Self, ScriptError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ScriptError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }
}

/// Outcome of [`Surface::replay`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayReport {
    /// Events applied successfully.
    pub applied: usize,
    /// Rejected events by index, with the reason.
    pub rejected: Vec<(usize, SurfaceError)>,
}

impl ReplayReport {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

impl Surface {
    /// Apply one script event.
    pub fn apply(&self, event: &ScriptEvent) -> Result<(), SurfaceError> {
        match event {
            ScriptEvent::AddProgram {
                program,
                root,
                components,
            } => {
                let components = components
                    .iter()
                    .map(|(name, value)| -> Result<(String, ModelValue), SurfaceError> {
                        Ok((name.clone(), ModelValue::from_json(value.clone())?))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                self.add_program(program, *root, components)
            }
            ScriptEvent::Update {
                program,
                component,
                value,
            } => {
                let value = ModelValue::from_json(value.clone())?;
                self.update_component(program, component, value)
            }
            ScriptEvent::RemoveProgram { program } => self.remove_program(program),
            ScriptEvent::Adjacent { parent, child } => self.adjacent(parent, child),
            ScriptEvent::Separated { parent, child } => self.separated(parent, child),
        }
    }

    /// Apply every event in order. Rejected events are logged and skipped.
    pub fn replay(&self, script: &Script) -> ReplayReport {
        let mut report = ReplayReport::default();
        for (index, event) in script.events.iter().enumerate() {
            match self.apply(event) {
                Ok(()) => {
                    log::debug!("[Script] #{} {}", index, event);
                    report.applied += 1;
                }
                Err(e) => {
                    log::warn!("[Script] #{} {} rejected: {}", index, event, e);
                    report.rejected.push((index, e));
                }
            }
        }
        report
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use std::io::Write;

    const SCENE: &str = r#"
name: battery and bulb
events:
  - event: add_program
    program: battery
    root: true
    components:
      voltage: 9
  - event: add_program
    program: bulb
    components:
      color: [1.0, 0.8, 0.2]
  - event: adjacent
    parent: battery
    child: bulb
  - event: update
    program: battery
    component: voltage
    value: 4.5
"#;

    #[test]
    fn test_parse_script() {
        let script = Script::from_yaml(SCENE).unwrap();
        assert_eq!(script.name.as_deref(), Some("battery and bulb"));
        assert_eq!(script.events.len(), 4);
        assert_eq!(
            script.events[2],
            ScriptEvent::Adjacent {
                parent: "battery".into(),
                child: "bulb".into()
            }
        );
        assert_eq!(script.events[3].to_string(), "update battery.voltage");
    }

    #[test]
    fn test_replay() {
        let surface = Surface::new(RuntimeConfig::default());
        let report = surface.replay(&Script::from_yaml(SCENE).unwrap());
        assert!(report.is_clean());
        assert_eq!(report.applied, 4);

        let model = surface.model();
        assert_eq!(model.get("battery.voltage"), Some(ModelValue::Scalar(4.5)));
        assert_eq!(
            model.get("bulb.color"),
            Some(ModelValue::Vector(vec![1.0, 0.8, 0.2]))
        );
        assert_eq!(model.get("bulb.energized"), Some(ModelValue::Bool(true)));
    }

    #[test]
    fn test_replay_continues_after_rejection() {
        let yaml = r#"
events:
  - event: adjacent
    parent: nobody
    child: nothing
  - event: add_program
    program: lamp
  - event: update
    program: lamp
    component: label
    value: null
  - event: remove_program
    program: lamp
"#;
        let surface = Surface::new(RuntimeConfig::default());
        let report = surface.replay(&Script::from_yaml(yaml).unwrap());
        assert_eq!(report.applied, 2);
        assert_eq!(report.rejected.len(), 2);
        assert_eq!(report.rejected[0].0, 0);
        assert!(matches!(report.rejected[1].1, SurfaceError::Model(_)));
        assert!(surface.programs().is_empty());
    }

    #[test]
    fn test_unknown_event_rejected() {
        let err = Script::from_yaml("events:\n  - event: teleport\n    program: x\n").unwrap_err();
        assert!(matches!(err, ScriptError::Yaml(_)));
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SCENE.as_bytes()).unwrap();
        let script = Script::from_yaml_file(file.path()).unwrap();
        assert_eq!(script.events.len(), 4);
    }
}
