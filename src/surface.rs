//! The surface context: one independent instance of the coordination core.
//!
//! A [`Surface`] owns a model store, a connectivity graph with its adjacency
//! router and a peripheral manager. Programs are placed on and lifted off the
//! surface through it; each program's components are published under
//! `"{program}.{component}"` and the program gets one connection element.
//! Several surfaces can coexist in one process.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::config::RuntimeConfig;
use crate::graph::{is_reserved_component, AdjacencyRouter, ConnectionGraph, GraphError, SharedGraph};
use crate::model::{Model, ModelError, ModelValue};
use crate::peripheral::{PeripheralError, PeripheralManager};

/// Errors from surface-level operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SurfaceError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Peripheral(#[from] PeripheralError),

    /// The program is not on the surface.
    #[error("Unknown program: {0}")]
    UnknownProgram(String),

    /// The program is already on the surface.
    #[error("Program already placed: {0}")]
    DuplicateProgram(String),

    /// The program never published the component.
    #[error("Program '{program}' has no component '{component}'")]
    UnknownComponent { program: String, component: String },

    /// The component name is owned by the adjacency router.
    #[error("Component name '{component}' is reserved (program '{program}')")]
    ReservedComponent { program: String, component: String },
}

fn check_component_name(program: &str, component: &str) -> Result<(), SurfaceError> {
    if is_reserved_component(component) {
        log::warn!("[Surface] '{}' tried to publish reserved component '{}'", program, component);
        return Err(SurfaceError::ReservedComponent {
            program: program.to_string(),
            component: component.to_string(),
        });
    }
    Ok(())
}

/// Store key of a program's component.
pub fn component_key(program: &str, component: &str) -> String {
    format!("{program}.{component}")
}

pub struct Surface {
    config: RuntimeConfig,
    model: Model,
    graph: SharedGraph,
    router: AdjacencyRouter,
    peripherals: Arc<PeripheralManager>,
    /// Live programs and the components each has published.
    programs: Mutex<BTreeMap<String, BTreeSet<String>>>,
}

impl Surface {
    pub fn new(config: RuntimeConfig) -> Self {
        let model = Model::with_config(config.model.clone());
        let graph = ConnectionGraph::shared();
        let router = AdjacencyRouter::new(model.clone(), graph.clone());
        let peripherals = Arc::new(PeripheralManager::new(config.peripheral.clone()));
        log::debug!("[Surface] created with {:?}", config);
        Self {
            config,
            model,
            graph,
            router,
            peripherals,
            programs: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn graph(&self) -> &SharedGraph {
        &self.graph
    }

    pub fn router(&self) -> &AdjacencyRouter {
        &self.router
    }

    pub fn peripherals(&self) -> &Arc<PeripheralManager> {
        &self.peripherals
    }

    // --- Program lifecycle ---

    /// Place a program: attach its element and publish its components.
    pub fn add_program<I, K, V>(&self, program: &str, is_root: bool, components: I) -> Result<(), SurfaceError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<ModelValue>,
    {
        let components: Vec<(String, ModelValue)> = components
            .into_iter()
            .map(|(name, value)| (name.into(), value.into()))
            .collect();
        for (name, _) in &components {
            check_component_name(program, name)?;
        }
        {
            let mut programs = self.programs.lock();
            if programs.contains_key(program) {
                return Err(SurfaceError::DuplicateProgram(program.to_string()));
            }
            programs.insert(program.to_string(), BTreeSet::new());
        }
        if let Err(e) = self.router.attach_program(program, is_root) {
            self.programs.lock().remove(program);
            return Err(e.into());
        }
        log::info!("[Surface] program '{}' placed", program);
        for (name, value) in components {
            self.publish(program, name, value);
        }
        Ok(())
    }

    /// Publish or replace one component of a placed program.
    pub fn update_component(
        &self,
        program: &str,
        component: &str,
        value: impl Into<ModelValue>,
    ) -> Result<(), SurfaceError> {
        if !self.programs.lock().contains_key(program) {
            return Err(SurfaceError::UnknownProgram(program.to_string()));
        }
        check_component_name(program, component)?;
        self.publish(program, component.to_string(), value.into());
        Ok(())
    }

    /// Withdraw one component of a placed program.
    pub fn remove_component(&self, program: &str, component: &str) -> Result<(), SurfaceError> {
        let removed = {
            let mut programs = self.programs.lock();
            let components = programs
                .get_mut(program)
                .ok_or_else(|| SurfaceError::UnknownProgram(program.to_string()))?;
            components.remove(component)
        };
        if !removed {
            return Err(SurfaceError::UnknownComponent {
                program: program.to_string(),
                component: component.to_string(),
            });
        }
        self.model.remove(&component_key(program, component));
        Ok(())
    }

    /// Lift a program off the surface: withdraw its components and dispose
    /// its element.
    pub fn remove_program(&self, program: &str) -> Result<(), SurfaceError> {
        if !self.programs.lock().contains_key(program) {
            return Err(SurfaceError::UnknownProgram(program.to_string()));
        }
        // The program stays registered if its element cannot be disposed.
        self.router.detach_program(program)?;
        let components = self.programs.lock().remove(program).unwrap_or_default();
        for component in components {
            self.model.remove(&component_key(program, &component));
        }
        log::info!("[Surface] program '{}' removed", program);
        Ok(())
    }

    /// Live programs, sorted.
    pub fn programs(&self) -> Vec<String> {
        self.programs.lock().keys().cloned().collect()
    }

    /// Components published by a program, sorted.
    pub fn components(&self, program: &str) -> Option<Vec<String>> {
        self.programs
            .lock()
            .get(program)
            .map(|c| c.iter().cloned().collect())
    }

    // --- Adjacency ---

    pub fn adjacent(&self, parent: &str, child: &str) -> Result<(), SurfaceError> {
        Ok(self.router.adjacent(parent, child)?)
    }

    pub fn separated(&self, parent: &str, child: &str) -> Result<(), SurfaceError> {
        Ok(self.router.separated(parent, child)?)
    }

    /// Whether a program's element is energized; `None` if it has none.
    pub fn is_energized(&self, program: &str) -> Option<bool> {
        let id = self.router.element_of(program)?;
        self.graph.lock().is_energized(id)
    }

    /// Remove every program, unregister every gate and close every session.
    pub fn shutdown(&self) {
        for program in self.programs() {
            if let Err(e) = self.remove_program(&program) {
                log::warn!("[Surface] failed to remove '{}' during shutdown: {}", program, e);
            }
        }
        self.model.clear_gates();
        self.peripherals.clear_sessions();
        log::info!("[Surface] shut down");
    }

    fn publish(&self, program: &str, component: String, value: ModelValue) {
        let key = component_key(program, &component);
        if let Some(components) = self.programs.lock().get_mut(program) {
            components.insert(component);
        }
        self.model.add(key, value);
    }
}

impl std::fmt::Debug for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface")
            .field("programs", &self.programs())
            .field("model", &self.model)
            .field("peripherals", &self.peripherals)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DerivedComponent;
    use crate::peripheral::{CharacteristicKey, DeviceId, GattServer, GattService};
    use async_trait::async_trait;
    use uuid::Uuid;

    fn surface() -> Surface {
        Surface::new(RuntimeConfig::default())
    }

    #[test]
    fn test_program_lifecycle() {
        let surface = surface();
        surface
            .add_program("lamp", false, [("brightness", 0.5), ("hue", 120.0)])
            .unwrap();

        let model = surface.model();
        assert_eq!(model.get("lamp.brightness"), Some(ModelValue::Scalar(0.5)));
        assert!(model.has("lamp.element"));
        assert_eq!(model.get("lamp.energized"), Some(ModelValue::Bool(false)));
        assert_eq!(surface.programs(), vec!["lamp"]);
        assert_eq!(
            surface.components("lamp"),
            Some(vec!["brightness".to_string(), "hue".to_string()])
        );

        surface.update_component("lamp", "brightness", 0.9).unwrap();
        assert_eq!(model.get("lamp.brightness"), Some(ModelValue::Scalar(0.9)));

        surface.remove_program("lamp").unwrap();
        assert!(model.is_empty());
        assert!(surface.programs().is_empty());
    }

    #[test]
    fn test_duplicate_and_unknown_programs() {
        let surface = surface();
        surface.add_program("a", true, Vec::<(String, f64)>::new()).unwrap();
        assert_eq!(
            surface.add_program("a", true, Vec::<(String, f64)>::new()),
            Err(SurfaceError::DuplicateProgram("a".into()))
        );
        assert_eq!(
            surface.update_component("ghost", "x", 1),
            Err(SurfaceError::UnknownProgram("ghost".into()))
        );
        assert_eq!(
            surface.remove_component("a", "x"),
            Err(SurfaceError::UnknownComponent {
                program: "a".into(),
                component: "x".into()
            })
        );
        assert!(matches!(
            surface.adjacent("a", "ghost"),
            Err(SurfaceError::Graph(GraphError::UnknownProgram(_)))
        ));
    }

    #[test]
    fn test_energized_through_adjacency() {
        let surface = surface();
        surface.add_program("battery", true, [("voltage", 9.0)]).unwrap();
        surface.add_program("bulb", false, [("watts", 5.0)]).unwrap();

        surface.adjacent("battery", "bulb").unwrap();
        assert_eq!(surface.is_energized("bulb"), Some(true));

        surface.separated("battery", "bulb").unwrap();
        assert_eq!(surface.is_energized("bulb"), Some(false));
        assert_eq!(surface.is_energized("ghost"), None);
    }

    #[test]
    fn test_cross_program_gate() {
        let surface = surface();
        let model = surface.model();
        let _glow = DerivedComponent::register(
            model,
            "bulb.glow",
            ["bulb.energized", "battery.voltage"],
            |v| match (v[0].as_bool(), v[1].as_scalar()) {
                (Some(true), Some(volts)) => Some(ModelValue::Scalar(volts / 9.0)),
                _ => Some(ModelValue::Scalar(0.0)),
            },
        )
        .unwrap();

        surface.add_program("bulb", false, Vec::<(String, f64)>::new()).unwrap();
        assert!(!model.has("bulb.glow"));

        surface.add_program("battery", true, [("voltage", 9.0)]).unwrap();
        assert_eq!(model.get("bulb.glow"), Some(ModelValue::Scalar(0.0)));

        surface.adjacent("battery", "bulb").unwrap();
        assert_eq!(model.get("bulb.glow"), Some(ModelValue::Scalar(1.0)));

        surface.remove_program("battery").unwrap();
        assert!(!model.has("bulb.glow"));
    }

    #[test]
    fn test_independent_surfaces() {
        let a = surface();
        let b = surface();
        a.add_program("p", false, [("x", 1)]).unwrap();
        assert!(a.model().has("p.x"));
        assert!(!b.model().has("p.x"));
        assert!(b.programs().is_empty());
    }

    #[test]
    fn test_reserved_component_names_rejected() {
        let surface = surface();
        for reserved in ["element", "energized"] {
            assert_eq!(
                surface.add_program("lamp", false, [(reserved, 1.0)]),
                Err(SurfaceError::ReservedComponent {
                    program: "lamp".into(),
                    component: reserved.into()
                })
            );
        }
        assert!(surface.programs().is_empty());
        assert!(surface.graph().lock().is_empty());
        assert!(surface.model().is_empty());

        surface.add_program("lamp", false, [("level", 1.0)]).unwrap();
        assert!(matches!(
            surface.update_component("lamp", "energized", true),
            Err(SurfaceError::ReservedComponent { .. })
        ));
        assert_eq!(surface.model().get("lamp.energized"), Some(ModelValue::Bool(false)));
        assert_eq!(surface.is_energized("lamp"), Some(false));
        assert!(surface.model().has("lamp.element"));

        surface.remove_program("lamp").unwrap();
        assert!(surface.graph().lock().is_empty());
    }

    #[test]
    fn test_remove_program_keeps_program_when_element_is_missing() {
        let surface = surface();
        surface.add_program("lamp", false, [("level", 1.0)]).unwrap();
        // Withdraw the element behind the surface's back.
        surface.router().detach_program("lamp").unwrap();

        assert!(matches!(
            surface.remove_program("lamp"),
            Err(SurfaceError::Graph(GraphError::UnknownProgram(_)))
        ));
        assert_eq!(surface.programs(), vec!["lamp"]);
        assert!(surface.model().has("lamp.level"));
    }

    struct EmptyServer;

    #[async_trait]
    impl GattServer for EmptyServer {
        async fn primary_service(
            &self,
            _service: Uuid,
        ) -> Result<Option<Arc<dyn GattService>>, PeripheralError> {
            Ok(None)
        }
    }

    #[test]
    fn test_shutdown_clears_everything() {
        let surface = surface();
        surface.add_program("a", true, [("x", 1)]).unwrap();
        surface.model().register_gate(["a.x"], |_| {}).unwrap();
        surface
            .peripherals()
            .add_session(DeviceId::new("dev"), Arc::new(EmptyServer));

        let key = CharacteristicKey::new(Uuid::from_u128(1), Uuid::from_u128(2));
        let err = tokio_test::block_on(surface.peripherals().write(key, vec![0u8])).unwrap_err();
        assert_eq!(err, PeripheralError::ServiceUnavailable(key));

        surface.shutdown();
        assert!(surface.programs().is_empty());
        assert!(surface.model().is_empty());
        assert_eq!(surface.model().gate_count(), 0);
        assert!(surface.peripherals().sessions().is_empty());
    }
}
