use std::collections::BTreeMap;
use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::Instrument;

use crate::server::{map, SharedRegisters};
use crate::types::Indexed;

/// `*IDN?` reply of the simulated instrument
pub const BENCH_IDENTITY: &str = "benchbus,BENCH-SIM,0,1.0";

/// `DMM_PROBE` value that puts the meter across the supply output
pub const PROBE_PSU_OUTPUT: u16 = 0xFFFF;

const UNDEFINED_HEADER: &str = "-113,\"Undefined header\"";

/// A handle to a running bench instrument. The listener and every open
/// session stop when the handle is dropped.
#[derive(Debug)]
pub struct InstrumentHandle {
    local_addr: SocketAddr,
    task: tokio::task::JoinHandle<()>,
    _tx: tokio::sync::mpsc::Sender<()>,
}

impl InstrumentHandle {
    /// address the instrument is listening on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// stop accepting, close every session and wait for the listener to exit
    pub async fn shutdown(self) {
        let Self { task, _tx, .. } = self;
        drop(_tx);
        if let Err(err) = task.await {
            tracing::warn!("instrument task failed: {}", err);
        }
    }
}

/// Spawns a simulated SCPI multimeter and power supply listening on `addr`.
/// This method can only be called from within the runtime context.
///
/// Meter readings come from `registers`: DC voltage is the input register
/// selected by the `DMM_PROBE` holding register (mV), DC current is the total
/// board current (mA) and resistance is the `DUT_RESISTANCE` holding register.
/// With the probe set to [`PROBE_PSU_OUTPUT`] the meter reads the supply
/// output instead.
/// Supply setpoints are written to the `PSU_*` holding registers and the
/// `PSU_OUTPUT` coil. The supply output current is the setpoint voltage across
/// `DUT_RESISTANCE`, clamped to the current limit.
///
/// Both drivers can share one instrument since they use disjoint commands.
pub async fn spawn_bench_instrument(
    addr: SocketAddr,
    registers: SharedRegisters,
) -> std::io::Result<InstrumentHandle> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    let (tx, rx) = tokio::sync::mpsc::channel(1);

    let mut task = ListenerTask {
        listener,
        registers,
        sessions: BTreeMap::new(),
        next_id: 0,
    };
    let task = tokio::spawn(
        async move { task.run(rx).await }
            .instrument(tracing::info_span!("Bench-Instrument", "listen" = ?local_addr)),
    );

    Ok(InstrumentHandle {
        local_addr,
        task,
        _tx: tx,
    })
}

struct ListenerTask {
    listener: TcpListener,
    registers: SharedRegisters,
    sessions: BTreeMap<u64, tokio::sync::mpsc::Sender<()>>,
    next_id: u64,
}

impl ListenerTask {
    async fn run(&mut self, mut shutdown: tokio::sync::mpsc::Receiver<()>) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("instrument shutdown");
                    return;
                }
                result = self.listener.accept() => {
                    match result {
                        Err(err) => {
                            tracing::error!("error accepting connection: {}", err);
                            return;
                        }
                        Ok((socket, addr)) => self.handle(socket, addr),
                    }
                }
            }
        }
    }

    fn handle(&mut self, socket: TcpStream, addr: SocketAddr) {
        // forget sessions that already ended
        self.sessions.retain(|_, tx| !tx.is_closed());

        let id = self.next_id;
        self.next_id += 1;
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        self.sessions.insert(id, tx);

        tracing::info!("accepted connection {} from: {}", id, addr);
        let registers = self.registers.clone();
        tokio::spawn(async move {
            if let Err(err) = run_session(socket, registers, rx).await {
                tracing::warn!("session {} ended: {}", id, err);
            }
            tracing::info!("shutdown session: {}", id);
        });
    }
}

async fn run_session(
    socket: TcpStream,
    registers: SharedRegisters,
    mut shutdown: tokio::sync::mpsc::Receiver<()>,
) -> std::io::Result<()> {
    let (reader, mut writer) = socket.into_split();
    let mut lines = BufReader::new(reader).lines();
    let mut state = SessionState::default();

    loop {
        tokio::select! {
            _ = shutdown.recv() => return Ok(()),
            line = lines.next_line() => {
                let Some(line) = line? else {
                    return Ok(());
                };
                tracing::debug!("RX: {}", line);
                if let Some(reply) = state.process(&line, &registers) {
                    tracing::debug!("TX: {}", reply);
                    writer.write_all(format!("{reply}\n").as_bytes()).await?;
                    writer.flush().await?;
                }
            }
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
enum MeterMode {
    #[default]
    VoltageDc,
    CurrentDc,
    Resistance,
}

#[derive(Debug, Default)]
struct SessionState {
    mode: MeterMode,
}

fn number(value: f64) -> String {
    format!("{value:.6}")
}

// engineering value to a register in thousandths, saturating
fn milli(value: f64) -> u16 {
    (value * 1000.0).round().clamp(0.0, f64::from(u16::MAX)) as u16
}

impl SessionState {
    /// execute one command line, returning the reply of a query
    fn process(&mut self, line: &str, registers: &SharedRegisters) -> Option<String> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let (header, argument) = match line.split_once(char::is_whitespace) {
            Some((header, argument)) => (header.to_ascii_uppercase(), Some(argument.trim())),
            None => (line.to_ascii_uppercase(), None),
        };

        match (header.as_str(), argument) {
            ("*IDN?", _) => Some(BENCH_IDENTITY.to_string()),
            ("*TST?", _) => Some("0".to_string()),
            ("*OPC?", _) => Some("1".to_string()),
            // meter state only, the supply output is shared between sessions
            ("*RST", _) => {
                self.mode = MeterMode::default();
                None
            }
            ("*CLS", _) => None,
            ("CONF:VOLT:DC" | "CONF:VOLT", _) => {
                self.mode = MeterMode::VoltageDc;
                None
            }
            ("CONF:CURR:DC" | "CONF:CURR", _) => {
                self.mode = MeterMode::CurrentDc;
                None
            }
            ("CONF:RES", _) => {
                self.mode = MeterMode::Resistance;
                None
            }
            (header, Some(_)) if header.ends_with(":RANG") => None,
            ("READ?", _) => Some(number(self.read(registers))),
            ("VOLT", Some(argument)) => {
                self.set_setpoint(registers, map::holding::PSU_VOLTAGE, header.as_str(), argument);
                None
            }
            ("CURR", Some(argument)) => {
                self.set_setpoint(
                    registers,
                    map::holding::PSU_CURRENT_LIMIT,
                    header.as_str(),
                    argument,
                );
                None
            }
            ("OUTP", Some(argument)) => {
                match argument.to_ascii_uppercase().as_str() {
                    "ON" | "1" => self.set_output(registers, true),
                    "OFF" | "0" => self.set_output(registers, false),
                    other => tracing::warn!("ignoring OUTP argument: {}", other),
                }
                None
            }
            ("MEAS:VOLT?", _) => Some(number(output_voltage(registers))),
            ("MEAS:CURR?", _) => Some(number(output_current(registers))),
            (header, _) if header.ends_with('?') => Some(UNDEFINED_HEADER.to_string()),
            (header, _) => {
                tracing::warn!("ignoring unknown command: {}", header);
                None
            }
        }
    }

    fn read(&self, registers: &SharedRegisters) -> f64 {
        let probe = registers
            .lock()
            .holding_register(map::holding::DMM_PROBE)
            .unwrap_or(0);
        if probe == PROBE_PSU_OUTPUT {
            return match self.mode {
                MeterMode::VoltageDc => output_voltage(registers),
                MeterMode::CurrentDc => output_current(registers),
                MeterMode::Resistance => load_resistance(registers),
            };
        }

        let space = registers.lock();
        match self.mode {
            MeterMode::VoltageDc => f64::from(space.input_register(probe).unwrap_or(0)) / 1000.0,
            MeterMode::CurrentDc => {
                f64::from(space.input_register(map::input::CURRENT_TOTAL).unwrap_or(0)) / 1000.0
            }
            MeterMode::Resistance => {
                f64::from(space.holding_register(map::holding::DUT_RESISTANCE).unwrap_or(0))
            }
        }
    }

    fn set_setpoint(&self, registers: &SharedRegisters, address: u16, header: &str, argument: &str) {
        let Ok(value) = argument.parse::<f64>() else {
            tracing::warn!("ignoring {} argument: {}", header, argument);
            return;
        };
        if let Err(err) = registers
            .lock()
            .write_holding_register(Indexed::new(address, milli(value)))
        {
            tracing::warn!("unable to store {} setpoint: {}", header, err);
        }
    }

    fn set_output(&self, registers: &SharedRegisters, on: bool) {
        if let Err(err) = registers
            .lock()
            .write_coil(Indexed::new(map::coil::PSU_OUTPUT, on))
        {
            tracing::warn!("unable to switch output: {}", err);
        }
    }
}

fn output_on(registers: &SharedRegisters) -> bool {
    registers.lock().coil(map::coil::PSU_OUTPUT).unwrap_or(false)
}

fn output_voltage(registers: &SharedRegisters) -> f64 {
    if !output_on(registers) {
        return 0.0;
    }
    let millivolts = registers
        .lock()
        .holding_register(map::holding::PSU_VOLTAGE)
        .unwrap_or(0);
    f64::from(millivolts) / 1000.0
}

fn load_resistance(registers: &SharedRegisters) -> f64 {
    f64::from(
        registers
            .lock()
            .holding_register(map::holding::DUT_RESISTANCE)
            .unwrap_or(0),
    )
}

fn output_current(registers: &SharedRegisters) -> f64 {
    if !output_on(registers) {
        return 0.0;
    }
    let limit = f64::from(
        registers
            .lock()
            .holding_register(map::holding::PSU_CURRENT_LIMIT)
            .unwrap_or(0),
    ) / 1000.0;
    let resistance = load_resistance(registers);
    if resistance <= 0.0 {
        return limit;
    }
    (output_voltage(registers) / resistance).min(limit)
}
