use crate::hal::equipment::HalError;
use crate::hal::measurement::TestMeasurement;
use crate::hal::scpi::ScpiSession;
use crate::hal::transport::Transport;

/// Digital multimeter driven with SCPI `CONF`/`READ?` pairs
#[derive(Debug)]
pub struct Multimeter {
    session: ScpiSession,
}

impl Multimeter {
    /// driver named `name` over `transport`
    pub fn new(name: &str, transport: Transport) -> Self {
        Self {
            session: ScpiSession::new(name, transport),
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

    /// identify then reset the meter
    pub async fn initialize(&mut self) -> Result<(), HalError> {
        self.session.identify().await?;
        self.session.reset().await
    }

    /// `*RST`
    pub async fn reset(&mut self) -> Result<(), HalError> {
        self.session.reset().await
    }

    /// `*TST?`, true on pass
    pub async fn self_test(&mut self) -> Result<bool, HalError> {
        self.session.self_test().await
    }

    /// DC voltage in volts, optionally fixing the range first
    pub async fn measure_voltage_dc(
        &mut self,
        range: Option<f64>,
    ) -> Result<TestMeasurement, HalError> {
        self.measure(Function::VoltageDc, range).await
    }

    /// DC current in amps, optionally fixing the range first
    pub async fn measure_current_dc(
        &mut self,
        range: Option<f64>,
    ) -> Result<TestMeasurement, HalError> {
        self.measure(Function::CurrentDc, range).await
    }

    /// 2-wire resistance in ohms, optionally fixing the range first
    pub async fn measure_resistance(
        &mut self,
        range: Option<f64>,
    ) -> Result<TestMeasurement, HalError> {
        self.measure(Function::Resistance, range).await
    }

    async fn measure(
        &mut self,
        function: Function,
        range: Option<f64>,
    ) -> Result<TestMeasurement, HalError> {
        if let Some(range) = range {
            self.session
                .command(&format!("{} {}", function.range_command(), range))
                .await?;
        }
        self.session.command(function.configure_command()).await?;
        let (parameter, unit) = function.parameter();
        self.session.measure("READ?", parameter, unit).await
    }
}

#[derive(Copy, Clone)]
enum Function {
    VoltageDc,
    CurrentDc,
    Resistance,
}

impl Function {
    fn configure_command(self) -> &'static str {
        match self {
            Function::VoltageDc => "CONF:VOLT:DC",
            Function::CurrentDc => "CONF:CURR:DC",
            Function::Resistance => "CONF:RES",
        }
    }

    fn range_command(self) -> &'static str {
        match self {
            Function::VoltageDc => "VOLT:DC:RANG",
            Function::CurrentDc => "CURR:DC:RANG",
            Function::Resistance => "RES:RANG",
        }
    }

    fn parameter(self) -> (&'static str, &'static str) {
        match self {
            Function::VoltageDc => ("DC_VOLTAGE", "V"),
            Function::CurrentDc => ("DC_CURRENT", "A"),
            Function::Resistance => ("RESISTANCE", "Ohm"),
        }
    }
}
