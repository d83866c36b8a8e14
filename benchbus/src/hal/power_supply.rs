use crate::hal::equipment::HalError;
use crate::hal::measurement::TestMeasurement;
use crate::hal::scpi::ScpiSession;
use crate::hal::transport::Transport;

/// Programmable DC power supply
///
/// Each setter is followed by `*OPC?`, so it returns only after the supply
/// has applied the setting. Use [`PowerSupply::measure_output_voltage`] and
/// [`PowerSupply::measure_output_current`] to verify the result.
#[derive(Debug)]
pub struct PowerSupply {
    session: ScpiSession,
    output_enabled: bool,
}

impl PowerSupply {
    /// driver named `name` over `transport`
    pub fn new(name: &str, transport: Transport) -> Self {
        Self {
            session: ScpiSession::new(name, transport),
            output_enabled: false,
        }
    }

    /// registry name
    pub fn name(&self) -> &str {
        self.session.name()
    }

    /// reply to the last `*IDN?`
    pub fn identity(&self) -> Option<&str> {
        self.session.identity()
    }

    /// underlying transport
    pub fn transport(&self) -> &Transport {
        self.session.transport()
    }

    /// output state from the last acknowledged [`PowerSupply::enable_output`]
    pub fn output_enabled(&self) -> bool {
        self.output_enabled
    }

    /// true while the transport is open
    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// open the transport
    pub async fn connect(&mut self) -> Result<(), HalError> {
        self.session.connect().await
    }

    /// close the transport
    pub async fn disconnect(&mut self) {
        self.session.disconnect().await
    }

    /// identify, reset and switch the output off
    pub async fn initialize(&mut self) -> Result<(), HalError> {
        self.session.identify().await?;
        self.session.reset().await?;
        self.enable_output(false).await
    }

    /// `*RST`
    pub async fn reset(&mut self) -> Result<(), HalError> {
        self.session.reset().await
    }

    /// `*TST?`, true on pass
    pub async fn self_test(&mut self) -> Result<bool, HalError> {
        self.session.self_test().await
    }

    /// output voltage setpoint in volts
    pub async fn set_voltage(&mut self, volts: f64) -> Result<(), HalError> {
        self.apply(&format!("VOLT {volts}")).await
    }

    /// current limit in amps
    pub async fn set_current_limit(&mut self, amps: f64) -> Result<(), HalError> {
        self.apply(&format!("CURR {amps}")).await
    }

    /// switch the output on or off
    pub async fn enable_output(&mut self, on: bool) -> Result<(), HalError> {
        self.apply(if on { "OUTP ON" } else { "OUTP OFF" }).await?;
        self.output_enabled = on;
        Ok(())
    }

    /// voltage present at the output terminals
    pub async fn measure_output_voltage(&mut self) -> Result<TestMeasurement, HalError> {
        self.session
            .measure("MEAS:VOLT?", "OUTPUT_VOLTAGE", "V")
            .await
    }

    /// current delivered by the output
    pub async fn measure_output_current(&mut self) -> Result<TestMeasurement, HalError> {
        self.session
            .measure("MEAS:CURR?", "OUTPUT_CURRENT", "A")
            .await
    }

    async fn apply(&mut self, command: &str) -> Result<(), HalError> {
        self.session.command(command).await?;
        self.session.wait_complete().await
    }
}
