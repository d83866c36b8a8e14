use std::sync::Arc;

use crate::exception::ExceptionCode;
use crate::types::{AddressRange, Indexed};

/// Number of cells in each of the four tables of the default space
pub const DEFAULT_SPACE_SIZE: usize = 1000;

/// Addresses of the named points of the PCBA test fixture
///
/// Rail voltages are in mV, currents in mA, temperatures in tenths of a degree Celsius.
pub mod map {
    /// input registers
    pub mod input {
        /// 3.3 V rail (mV)
        pub const RAIL_3V3: u16 = 0;
        /// 5 V rail (mV)
        pub const RAIL_5V: u16 = 1;
        /// 1.2 V rail (mV)
        pub const RAIL_1V2: u16 = 2;
        /// 2.5 V reference (mV)
        pub const REF_2V5: u16 = 3;
        /// 1.8 V rail (mV)
        pub const RAIL_1V8: u16 = 4;
        /// total board current (mA)
        pub const CURRENT_TOTAL: u16 = 10;
        /// digital section current (mA)
        pub const CURRENT_DIGITAL: u16 = 11;
        /// analog section current (mA)
        pub const CURRENT_ANALOG: u16 = 12;
        /// ambient temperature (0.1 °C)
        pub const TEMP_AMBIENT: u16 = 20;
        /// hot spot temperature (0.1 °C)
        pub const TEMP_HOTSPOT: u16 = 21;
    }

    /// coils
    pub mod coil {
        /// system ready
        pub const SYSTEM_READY: u16 = 0;
        /// test in progress, toggled by the drift loop
        pub const TEST_IN_PROGRESS: u16 = 1;
        /// power good
        pub const POWER_GOOD: u16 = 2;
        /// alarm active
        pub const ALARM: u16 = 3;
        /// bench power supply output enabled
        pub const PSU_OUTPUT: u16 = 10;
    }

    /// discrete inputs
    pub mod discrete {
        /// DUT powered
        pub const DUT_POWER_ON: u16 = 0;
        /// DUT in test mode
        pub const DUT_TEST_MODE: u16 = 1;
        /// DUT ready
        pub const DUT_READY: u16 = 2;
    }

    /// holding registers
    pub mod holding {
        /// test mode, 1 = auto, 2 = manual
        pub const TEST_MODE: u16 = 0;
        /// current test sequence step
        pub const SEQUENCE_STEP: u16 = 1;
        /// test timeout (s)
        pub const TEST_TIMEOUT: u16 = 2;
        /// bench power supply voltage setpoint (mV)
        pub const PSU_VOLTAGE: u16 = 10;
        /// bench power supply current limit (mA)
        pub const PSU_CURRENT_LIMIT: u16 = 11;
        /// resistance seen by the bench multimeter (Ω)
        pub const DUT_RESISTANCE: u16 = 12;
        /// input register the bench multimeter voltage probe is attached to
        pub const DMM_PROBE: u16 = 13;
    }
}

/// Simulated PLC memory: four independently addressed tables of typed cells
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisterSpace {
    coils: Vec<bool>,
    discrete_inputs: Vec<bool>,
    holding_registers: Vec<u16>,
    input_registers: Vec<u16>,
}

/// A [`RegisterSpace`] shared between the I/O loop, the drift loop and the bench instrument
pub type SharedRegisters = Arc<parking_lot::Mutex<RegisterSpace>>;

/// Values of the named fixture points at one instant
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize))]
pub struct FixtureSnapshot {
    /// 3.3 V rail (mV)
    pub rail_3v3: u16,
    /// 5 V rail (mV)
    pub rail_5v: u16,
    /// 1.2 V rail (mV)
    pub rail_1v2: u16,
    /// total current (mA)
    pub total_current: u16,
    /// digital current (mA)
    pub digital_current: u16,
    /// ambient temperature (°C)
    pub ambient_temperature: f64,
    /// hot spot temperature (°C)
    pub hotspot_temperature: f64,
    /// system ready coil
    pub system_ready: bool,
    /// test in progress coil
    pub test_in_progress: bool,
    /// power good coil
    pub power_good: bool,
}

fn get_range_of<T>(slice: &[T], range: AddressRange) -> Result<&[T], ExceptionCode> {
    slice
        .get(range.to_std_range())
        .ok_or(ExceptionCode::IllegalDataAddress)
}

fn get_mut_of<T>(slice: &mut [T], address: u16) -> Result<&mut T, ExceptionCode> {
    slice
        .get_mut(address as usize)
        .ok_or(ExceptionCode::IllegalDataAddress)
}

impl Default for RegisterSpace {
    fn default() -> Self {
        Self::new(DEFAULT_SPACE_SIZE)
    }
}

impl RegisterSpace {
    /// all four tables sized `size`, zeroed
    pub fn new(size: usize) -> Self {
        Self::with_sizes(size, size, size, size)
    }

    /// tables with individual sizes, zeroed
    pub fn with_sizes(
        coils: usize,
        discrete_inputs: usize,
        holding_registers: usize,
        input_registers: usize,
    ) -> Self {
        Self {
            coils: vec![false; coils],
            discrete_inputs: vec![false; discrete_inputs],
            holding_registers: vec![0; holding_registers],
            input_registers: vec![0; input_registers],
        }
    }

    /// default-sized space seeded with the PCBA fixture values
    pub fn pcba_fixture() -> Self {
        use map::*;

        let mut space = Self::default();
        for (address, value) in [
            (input::RAIL_3V3, 3300),
            (input::RAIL_5V, 5000),
            (input::RAIL_1V2, 1200),
            (input::REF_2V5, 2500),
            (input::RAIL_1V8, 1800),
            (input::CURRENT_TOTAL, 150),
            (input::CURRENT_DIGITAL, 50),
            (input::CURRENT_ANALOG, 100),
            (input::TEMP_AMBIENT, 250),
            (input::TEMP_HOTSPOT, 350),
        ] {
            space.input_registers[address as usize] = value;
        }
        for (address, value) in [
            (coil::SYSTEM_READY, true),
            (coil::TEST_IN_PROGRESS, false),
            (coil::POWER_GOOD, true),
            (coil::ALARM, false),
        ] {
            space.coils[address as usize] = value;
        }
        for (address, value) in [
            (discrete::DUT_POWER_ON, true),
            (discrete::DUT_TEST_MODE, false),
            (discrete::DUT_READY, true),
        ] {
            space.discrete_inputs[address as usize] = value;
        }
        for (address, value) in [
            (holding::TEST_MODE, 1),
            (holding::SEQUENCE_STEP, 0),
            (holding::TEST_TIMEOUT, 100),
            (holding::DUT_RESISTANCE, 1000),
            (holding::DMM_PROBE, input::RAIL_3V3),
        ] {
            space.holding_registers[address as usize] = value;
        }
        space
    }

    /// wrap in the lock shared by the simulator tasks
    pub fn into_shared(self) -> SharedRegisters {
        Arc::new(parking_lot::Mutex::new(self))
    }

    pub fn read_coils(&self, range: AddressRange) -> Result<&[bool], ExceptionCode> {
        get_range_of(&self.coils, range)
    }

    pub fn read_discrete_inputs(&self, range: AddressRange) -> Result<&[bool], ExceptionCode> {
        get_range_of(&self.discrete_inputs, range)
    }

    pub fn read_holding_registers(&self, range: AddressRange) -> Result<&[u16], ExceptionCode> {
        get_range_of(&self.holding_registers, range)
    }

    pub fn read_input_registers(&self, range: AddressRange) -> Result<&[u16], ExceptionCode> {
        get_range_of(&self.input_registers, range)
    }

    pub fn write_coil(&mut self, value: Indexed<bool>) -> Result<(), ExceptionCode> {
        *get_mut_of(&mut self.coils, value.index)? = value.value;
        Ok(())
    }

    pub fn write_holding_register(&mut self, value: Indexed<u16>) -> Result<(), ExceptionCode> {
        *get_mut_of(&mut self.holding_registers, value.index)? = value.value;
        Ok(())
    }

    /// set a read-only input register from the simulation side
    pub fn set_input_register(&mut self, value: Indexed<u16>) -> Result<(), ExceptionCode> {
        *get_mut_of(&mut self.input_registers, value.index)? = value.value;
        Ok(())
    }

    /// set a read-only discrete input from the simulation side
    pub fn set_discrete_input(&mut self, value: Indexed<bool>) -> Result<(), ExceptionCode> {
        *get_mut_of(&mut self.discrete_inputs, value.index)? = value.value;
        Ok(())
    }

    pub fn coil(&self, address: u16) -> Option<bool> {
        self.coils.get(address as usize).copied()
    }

    pub fn discrete_input(&self, address: u16) -> Option<bool> {
        self.discrete_inputs.get(address as usize).copied()
    }

    pub fn holding_register(&self, address: u16) -> Option<u16> {
        self.holding_registers.get(address as usize).copied()
    }

    pub fn input_register(&self, address: u16) -> Option<u16> {
        self.input_registers.get(address as usize).copied()
    }

    pub fn snapshot(&self) -> FixtureSnapshot {
        use map::*;

        let register = |address| self.input_register(address).unwrap_or_default();
        let flag = |address| self.coil(address).unwrap_or_default();
        FixtureSnapshot {
            rail_3v3: register(input::RAIL_3V3),
            rail_5v: register(input::RAIL_5V),
            rail_1v2: register(input::RAIL_1V2),
            total_current: register(input::CURRENT_TOTAL),
            digital_current: register(input::CURRENT_DIGITAL),
            ambient_temperature: f64::from(register(input::TEMP_AMBIENT)) / 10.0,
            hotspot_temperature: f64::from(register(input::TEMP_HOTSPOT)) / 10.0,
            system_ready: flag(coil::SYSTEM_READY),
            test_in_progress: flag(coil::TEST_IN_PROGRESS),
            power_good: flag(coil::POWER_GOOD),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixture_seeds_rails() {
        let space = RegisterSpace::pcba_fixture();
        assert_eq!(
            space.read_input_registers(AddressRange::new(0, 5)).unwrap(),
            &[3300, 5000, 1200, 2500, 1800]
        );
        assert_eq!(
            space.read_coils(AddressRange::new(0, 4)).unwrap(),
            &[true, false, true, false]
        );
        assert_eq!(
            space.read_holding_registers(AddressRange::new(0, 3)).unwrap(),
            &[1, 0, 100]
        );
    }

    #[test]
    fn reads_past_the_end_are_illegal_addresses() {
        let space = RegisterSpace::default();
        assert_eq!(
            space.read_holding_registers(AddressRange::new(995, 10)),
            Err(ExceptionCode::IllegalDataAddress)
        );
        assert_eq!(
            space.read_coils(AddressRange::new(0xFFFF, 0xFFFF)),
            Err(ExceptionCode::IllegalDataAddress)
        );
        assert_eq!(
            space
                .read_input_registers(AddressRange::new(990, 10))
                .unwrap()
                .len(),
            10
        );
    }

    #[test]
    fn writes_are_bounds_checked() {
        let mut space = RegisterSpace::new(10);
        assert!(space.write_coil(Indexed::new(9, true)).is_ok());
        assert_eq!(space.coil(9), Some(true));
        assert_eq!(
            space.write_coil(Indexed::new(10, true)),
            Err(ExceptionCode::IllegalDataAddress)
        );
        assert_eq!(
            space.write_holding_register(Indexed::new(10, 1)),
            Err(ExceptionCode::IllegalDataAddress)
        );
    }

    #[test]
    fn snapshot_scales_temperatures() {
        let snapshot = RegisterSpace::pcba_fixture().snapshot();
        assert_eq!(snapshot.rail_5v, 5000);
        assert_eq!(snapshot.ambient_temperature, 25.0);
        assert_eq!(snapshot.hotspot_temperature, 35.0);
        assert!(snapshot.power_good);
    }
}
