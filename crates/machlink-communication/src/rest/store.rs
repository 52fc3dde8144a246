//! Variable store of the REST firmware

use machlink_core::{
    Array, Priority, StoreError, Temperature, Value, ValueKind, Variable, VariableRegistry,
    VariableStore, VariableType,
};
use std::collections::BTreeMap;

use super::address::RestAddress;
use super::persisted::{parse_default, PersistedDefault};

type Key<T> = Variable<RestAddress, T>;

/// Typed handles to every firmware variable
pub struct RestStore {
    /// Firmware state (`idle`, `processing`, `paused`, ...)
    pub machine_status: Key<String>,
    /// Machine position per axis
    pub axis_position: Array<RestAddress, f64>,
    /// Homed flag per axis
    pub axis_homed: Array<RestAddress, bool>,
    /// Every axis homed
    pub all_homed: Key<bool>,
    /// Selected tool, -1 for none
    pub current_tool: Key<i32>,
    /// Measured heater temperatures
    pub heater_current: Array<RestAddress, f64>,
    /// Active heater set points
    pub heater_active: Array<RestAddress, f64>,
    /// Bed current/target pair
    pub bed_temperature: Key<Temperature>,
    /// Tool heater current/target pair
    pub tool_temperature: Key<Temperature>,
    /// Position in the job queue
    pub queue_position: Key<i32>,
    /// Selected process mode
    pub process_mode: Key<u16>,
    /// Chamber light on
    pub chamber_light: Key<bool>,
    /// Z offset of the active tool
    pub tool_offset_z: Key<f64>,
    persisted: Vec<PersistedDefault>,
    registry: VariableRegistry<RestAddress>,
}

fn declare_persisted<T: VariableType>(
    variable: &Key<T>,
    default: T,
    overrides: &BTreeMap<String, String>,
) -> Option<PersistedDefault> {
    let name = variable.address()?.global_name()?.to_string();
    let value = match overrides.get(&name) {
        Some(text) => parse_default(text, T::KIND).unwrap_or_else(|| {
            tracing::warn!(global = %name, value = %text, "Ignoring unparsable default override");
            default.clone().into_value()
        }),
        None => default.into_value(),
    };
    Some(PersistedDefault::new(name, T::KIND, value))
}

fn temperature(name: &str, current: Option<&Key<f64>>, target: Option<&Key<f64>>) -> Key<Temperature> {
    let inputs: Vec<&Key<f64>> = current.into_iter().chain(target).collect();
    Variable::derived(name, &inputs, |pair| match pair {
        [Some(current), Some(target)] => Some(Temperature::new(*current, *target)),
        _ => None,
    })
}

impl RestStore {
    /// Axis units
    pub const AXES: [&'static str; 3] = ["X", "Y", "Z"];
    /// Heater units, in heater number order
    pub const HEATERS: [&'static str; 2] = ["bed", "tool"];

    /// Build the store; `overrides` replaces persisted defaults by global name
    pub fn new(overrides: &BTreeMap<String, String>) -> Result<Self, StoreError> {
        let machine_status: Key<String> =
            Variable::builder("machine_status", RestAddress::key("state.status"))
                .priority(Priority::High)
                .read_only()
                .build();

        let axis_position: Array<RestAddress, f64> = Array::builder(
            "axis_position",
            RestAddress::indexed("move.axes", 0, "machinePosition"),
            Self::AXES.len(),
        )
        .priority(Priority::Highest)
        .units(Self::AXES)
        .read_only()
        .build()?;
        let axis_homed: Array<RestAddress, bool> = Array::builder(
            "axis_homed",
            RestAddress::indexed("move.axes", 0, "homed"),
            Self::AXES.len(),
        )
        .priority(Priority::Medium)
        .units(Self::AXES)
        .read_only()
        .build()?;
        let homed: Vec<&Key<bool>> = axis_homed.iter().collect();
        let all_homed = Variable::derived("all_homed", &homed, |flags| {
            flags
                .iter()
                .copied()
                .collect::<Option<Vec<bool>>>()
                .map(|flags| flags.into_iter().all(|h| h))
        });

        let current_tool: Key<i32> =
            Variable::builder("current_tool", RestAddress::key("state.currentTool"))
                .priority(Priority::Medium)
                .read_only()
                .build();

        let heater_current: Array<RestAddress, f64> = Array::builder(
            "heater_current",
            RestAddress::indexed("heat.heaters", 0, "current"),
            Self::HEATERS.len(),
        )
        .priority(Priority::Low)
        .units(Self::HEATERS)
        .read_only()
        .build()?;
        let heater_active: Array<RestAddress, f64> = Array::builder(
            "heater_active",
            RestAddress::indexed("heat.heaters", 0, "active"),
            Self::HEATERS.len(),
        )
        .priority(Priority::Low)
        .units(Self::HEATERS)
        .read_only()
        .build()?;
        let bed_temperature = temperature(
            "bed_temperature",
            heater_current.by_unit("bed"),
            heater_active.by_unit("bed"),
        );
        let tool_temperature = temperature(
            "tool_temperature",
            heater_current.by_unit("tool"),
            heater_active.by_unit("tool"),
        );

        let queue_position: Key<i32> =
            Variable::builder("queue_position", RestAddress::global("queuePos"))
                .priority(Priority::Low)
                .build();
        let process_mode: Key<u16> =
            Variable::builder("process_mode", RestAddress::global("processMode"))
                .priority(Priority::Low)
                .build();
        let chamber_light: Key<bool> =
            Variable::builder("chamber_light", RestAddress::global("chamberLight"))
                .priority(Priority::Low)
                .build();
        let tool_offset_z: Key<f64> =
            Variable::builder("tool_offset_z", RestAddress::global("toolOffsetZ"))
                .priority(Priority::Low)
                .unit("mm")
                .build();

        let persisted = [
            declare_persisted(&queue_position, 0, overrides),
            declare_persisted(&process_mode, 0, overrides),
            declare_persisted(&chamber_light, false, overrides),
            declare_persisted(&tool_offset_z, 0.0, overrides),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>();
        for name in overrides.keys() {
            if !persisted.iter().any(|d| &d.name == name) {
                tracing::warn!(global = %name, "Default override for unknown global ignored");
            }
        }

        let mut builder = VariableRegistry::builder();
        builder
            .variable(&machine_status)?
            .array(&axis_position)?
            .array(&axis_homed)?
            .variable(&all_homed)?
            .variable(&current_tool)?
            .array(&heater_current)?
            .array(&heater_active)?
            .variable(&bed_temperature)?
            .variable(&tool_temperature)?
            .variable(&queue_position)?
            .variable(&process_mode)?
            .variable(&chamber_light)?
            .variable(&tool_offset_z)?;

        Ok(Self {
            machine_status,
            axis_position,
            axis_homed,
            all_homed,
            current_tool,
            heater_current,
            heater_active,
            bed_temperature,
            tool_temperature,
            queue_position,
            process_mode,
            chamber_light,
            tool_offset_z,
            persisted,
            registry: builder.build(),
        })
    }

    /// Globals that must exist, with their defaults
    pub fn persisted(&self) -> &[PersistedDefault] {
        &self.persisted
    }

    /// Default of one persisted global
    pub fn persisted_default(&self, name: &str) -> Option<&Value> {
        self.persisted
            .iter()
            .find(|d| d.name == name)
            .map(|d| &d.value)
    }

    /// Kind of one persisted global
    pub fn persisted_kind(&self, name: &str) -> Option<ValueKind> {
        self.persisted.iter().find(|d| d.name == name).map(|d| d.kind)
    }
}

impl VariableStore for RestStore {
    type Address = RestAddress;

    fn registry(&self) -> &VariableRegistry<RestAddress> {
        &self.registry
    }
}
