//! Variable store of the RPC controller
//!
//! Fixed memory map: axis data and status in the low words and doubles,
//! request bits in word 13, spindle and chamber in words 22 and D11..D13.

use machlink_core::{
    Array, Priority, StoreError, Temperature, Variable, VariableRegistry, VariableStore,
};

use super::address::RpcAddress;

type Word<T> = Variable<RpcAddress, T>;

const fn bit(index: u16, bit: u8) -> RpcAddress {
    RpcAddress::Bit { index, bit }
}

/// Typed handles to every controller variable
pub struct RpcStore {
    /// Machine position per axis
    pub axis_position: Array<RpcAddress, f64>,
    /// Referenced flag per axis
    pub axis_homed: Array<RpcAddress, bool>,
    /// X, Y and Z are all referenced
    pub all_homed: Word<bool>,
    /// Controller state word
    pub machine_state: Word<u16>,
    /// A program is executing
    pub cycle_running: Word<bool>,
    /// Feed hold is in effect
    pub feed_hold_active: Word<bool>,
    /// Rising edge starts the active program
    pub cycle_start_request: Word<bool>,
    /// Rising edge stops the active program
    pub cycle_stop_request: Word<bool>,
    /// Rising edge pauses motion
    pub feed_hold_request: Word<bool>,
    /// Rising edge references every axis
    pub home_request: Word<bool>,
    /// Tool in the spindle
    pub tool_number: Word<u16>,
    /// Feed override percentage
    pub feed_override: Word<u16>,
    /// Position in the job queue
    pub queue_position: Word<i32>,
    /// Spindle speed in rpm
    pub spindle_speed: Word<f64>,
    /// Spindle running
    pub spindle_on: Word<bool>,
    /// Chamber heater enabled
    pub chamber_heater: Word<bool>,
    /// Measured chamber temperature
    pub chamber_temperature_current: Word<f64>,
    /// Chamber set point
    pub chamber_temperature_target: Word<f64>,
    /// Chamber current/target pair
    pub chamber_temperature: Word<Temperature>,
    /// Selected part program
    pub program_number: Word<u16>,
    registry: VariableRegistry<RpcAddress>,
}

impl RpcStore {
    /// Axis units; rotary axes fall back to their slot number
    pub const AXES: [&'static str; 3] = ["X", "Y", "Z"];
    /// Axis slots
    pub const AXIS_COUNT: usize = 5;

    /// Build the store and its registry
    pub fn new() -> Result<Self, StoreError> {
        let axis_position: Array<RpcAddress, f64> =
            Array::builder("axis_position", RpcAddress::double(0), Self::AXIS_COUNT)
                .priority(Priority::Highest)
                .units(Self::AXES)
                .read_only()
                .build()?;
        let axis_homed: Array<RpcAddress, bool> =
            Array::builder("axis_homed", bit(10, 0), Self::AXIS_COUNT)
                .priority(Priority::Medium)
                .units(Self::AXES)
                .read_only()
                .build()?;
        let linear: Vec<&Word<bool>> = axis_homed.iter().take(Self::AXES.len()).collect();
        let all_homed = Variable::derived("all_homed", &linear, |homed| {
            homed
                .iter()
                .copied()
                .collect::<Option<Vec<bool>>>()
                .map(|flags| flags.into_iter().all(|h| h))
        });

        let machine_state: Word<u16> = Variable::builder("machine_state", RpcAddress::word(11))
            .priority(Priority::High)
            .read_only()
            .build();
        let cycle_running: Word<bool> = Variable::builder("cycle_running", bit(12, 0))
            .priority(Priority::High)
            .read_only()
            .build();
        let feed_hold_active: Word<bool> = Variable::builder("feed_hold_active", bit(12, 1))
            .priority(Priority::High)
            .read_only()
            .build();

        let cycle_start_request: Word<bool> =
            Variable::new("cycle_start_request", bit(13, 0), Priority::Medium);
        let cycle_stop_request: Word<bool> =
            Variable::new("cycle_stop_request", bit(13, 1), Priority::Medium);
        let feed_hold_request: Word<bool> =
            Variable::new("feed_hold_request", bit(13, 2), Priority::Medium);
        let home_request: Word<bool> = Variable::new("home_request", bit(13, 3), Priority::Medium);

        let tool_number: Word<u16> =
            Variable::new("tool_number", RpcAddress::word(20), Priority::Medium);
        let feed_override: Word<u16> = Variable::builder("feed_override", RpcAddress::word(21))
            .unit("%")
            .build();
        let queue_position: Word<i32> =
            Variable::new("queue_position", RpcAddress::double(10), Priority::Low);
        let spindle_speed: Word<f64> = Variable::builder("spindle_speed", RpcAddress::double(11))
            .unit("rpm")
            .build();
        let spindle_on: Word<bool> = Variable::new("spindle_on", bit(22, 0), Priority::Medium);
        let chamber_heater: Word<bool> = Variable::new("chamber_heater", bit(22, 1), Priority::Low);

        let chamber_temperature_current: Word<f64> =
            Variable::builder("chamber_temperature_current", RpcAddress::double(12))
                .priority(Priority::Low)
                .unit("°C")
                .read_only()
                .build();
        let chamber_temperature_target: Word<f64> =
            Variable::builder("chamber_temperature_target", RpcAddress::double(13))
                .priority(Priority::Low)
                .unit("°C")
                .build();
        let chamber_temperature = Variable::derived(
            "chamber_temperature",
            &[&chamber_temperature_current, &chamber_temperature_target],
            |pair| Some(Temperature::new(pair[0]?, pair[1]?)),
        );

        let program_number: Word<u16> =
            Variable::new("program_number", RpcAddress::word(23), Priority::Low);

        let mut builder = VariableRegistry::builder();
        builder
            .array(&axis_position)?
            .array(&axis_homed)?
            .variable(&all_homed)?
            .variable(&machine_state)?
            .variable(&cycle_running)?
            .variable(&feed_hold_active)?
            .variable(&cycle_start_request)?
            .variable(&cycle_stop_request)?
            .variable(&feed_hold_request)?
            .variable(&home_request)?
            .variable(&tool_number)?
            .variable(&feed_override)?
            .variable(&queue_position)?
            .variable(&spindle_speed)?
            .variable(&spindle_on)?
            .variable(&chamber_heater)?
            .variable(&chamber_temperature_current)?
            .variable(&chamber_temperature_target)?
            .variable(&chamber_temperature)?
            .variable(&program_number)?;

        Ok(Self {
            axis_position,
            axis_homed,
            all_homed,
            machine_state,
            cycle_running,
            feed_hold_active,
            cycle_start_request,
            cycle_stop_request,
            feed_hold_request,
            home_request,
            tool_number,
            feed_override,
            queue_position,
            spindle_speed,
            spindle_on,
            chamber_heater,
            chamber_temperature_current,
            chamber_temperature_target,
            chamber_temperature,
            program_number,
            registry: builder.build(),
        })
    }
}

impl VariableStore for RpcStore {
    type Address = RpcAddress;

    fn registry(&self) -> &VariableRegistry<RpcAddress> {
        &self.registry
    }
}
