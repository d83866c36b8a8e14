//! Command-line front end for the simulated test bench

use std::net::SocketAddr;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use benchbus::client::{ClientConfig, ModbusTestResult, ResponseValues, TestClient};
use benchbus::hal::{
    spawn_bench_instrument, ConnectionConfig, EquipmentConfig, EquipmentKind, HardwareManager,
    ManagerError, PROBE_PSU_OUTPUT,
};
use benchbus::sequence::{
    voltage_sweep_sequence, EngineError, Limits, SweepPoint, TestExecutionEngine,
};
use benchbus::server::{map, spawn_simulator, RegisterSpace, SimulatorConfig};
use benchbus::{ConnectionError, PhysLayer, SerialSettings};

#[derive(Debug, thiserror::Error)]
enum Error {
    #[error("{0}")]
    Connection(#[from] ConnectionError),
    #[error("{0}")]
    Manager(#[from] ManagerError),
    #[error("{0}")]
    Engine(#[from] EngineError),
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("bad sweep point: {0}")]
    BadSweepPoint(String),
    #[error("request failed: {0}")]
    Request(String),
}

#[derive(Parser)]
#[command(name = "benchbus")]
#[command(about = "Modbus RTU PLC simulator, test client and bench sequence runner")]
#[command(version)]
struct Cli {
    #[arg(short = 'v', long, help = "Log at DEBUG instead of INFO")]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(name = "simulate", about = "serve the PCBA fixture on a serial port")]
    Simulate(SimulateArgs),

    #[command(name = "client", about = "issue requests to a simulator on a serial port")]
    Client(ClientArgs),

    #[command(name = "demo", about = "run simulator, client suite and a voltage sweep in-process")]
    Demo(DemoArgs),
}

#[derive(Args)]
struct SerialArgs {
    #[arg(short = 'p', long, help = "serial port path, e.g. /dev/ttyUSB0 or COM3")]
    port: String,

    #[arg(short = 'b', long, default_value = "9600", help = "baud rate, 8N1 framing")]
    baud: u32,

    #[arg(short = 'i', long, default_value = "1", help = "Modbus unit id")]
    id: u8,
}

#[derive(Args)]
struct SimulateArgs {
    #[command(flatten)]
    serial: SerialArgs,

    #[arg(long, help = "hold the seed values instead of drifting them")]
    no_drift: bool,

    #[arg(long, default_value = "10", help = "seconds between status lines")]
    status_period: u64,
}

#[derive(Args)]
struct ClientArgs {
    #[command(flatten)]
    serial: SerialArgs,

    #[arg(short = 't', long, default_value = "1000", help = "response timeout in milliseconds")]
    timeout: u64,

    #[command(subcommand)]
    request: Request,
}

#[derive(Subcommand)]
enum Request {
    #[command(name = "rc", about = "read coils")]
    ReadCoils(ReadArgs),

    #[command(name = "rdi", about = "read discrete inputs")]
    ReadDiscreteInputs(ReadArgs),

    #[command(name = "rhr", about = "read holding registers")]
    ReadHoldingRegisters(ReadArgs),

    #[command(name = "rir", about = "read input registers")]
    ReadInputRegisters(ReadArgs),

    #[command(name = "wsc", about = "write single coil")]
    WriteSingleCoil(WriteSingleCoilArgs),

    #[command(name = "wsr", about = "write single register")]
    WriteSingleRegister(WriteSingleRegisterArgs),

    #[command(name = "suite", about = "run the comprehensive PCBA test suite")]
    Suite,

    #[command(name = "perf", about = "rapid reads followed by write/read cycles")]
    Performance(PerformanceArgs),

    #[command(name = "stress", about = "continuous reads for a fixed time")]
    Stress(StressArgs),
}

#[derive(Args)]
struct ReadArgs {
    #[arg(short = 's', long, help = "the starting address")]
    start: u16,

    #[arg(short = 'q', long, help = "quantity of values")]
    quantity: u16,
}

#[derive(Args)]
struct WriteSingleCoilArgs {
    #[arg(short = 'i', long, help = "the address of the coil")]
    index: u16,

    #[arg(short = 'v', long, help = "the value of the coil (true or false)")]
    value: bool,
}

#[derive(Args)]
struct WriteSingleRegisterArgs {
    #[arg(short = 'i', long, help = "the address of the register")]
    index: u16,

    #[arg(short = 'v', long, help = "the value of the register")]
    value: u16,
}

#[derive(Args)]
struct PerformanceArgs {
    #[arg(short = 'r', long, default_value = "100", help = "number of rapid reads")]
    reads: usize,

    #[arg(short = 'c', long, default_value = "50", help = "number of write/read cycles")]
    cycles: usize,
}

#[derive(Args)]
struct StressArgs {
    #[arg(short = 'd', long, default_value = "30", help = "test length in seconds")]
    duration: u64,

    #[arg(short = 'i', long, default_value = "100", help = "milliseconds between reads")]
    interval: u64,
}

#[derive(Args)]
struct DemoArgs {
    #[arg(
        short = 'p',
        long,
        default_value = "3.3,5.0,12.0",
        help = "comma separated sweep voltages"
    )]
    points: String,

    #[arg(long, default_value = "0.05", help = "allowed deviation of each reading in volts")]
    tolerance: f64,

    #[arg(long, help = "print the sequence summary as JSON")]
    json: bool,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .with_target(false)
        .init();

    if let Err(ref e) = run(cli.command).await {
        println!("error: {e}");
    }

    Ok(())
}

async fn run(command: Command) -> Result<(), Error> {
    match command {
        Command::Simulate(args) => simulate(args).await,
        Command::Client(args) => client(args).await,
        Command::Demo(args) => demo(args).await,
    }
}

async fn simulate(args: SimulateArgs) -> Result<(), Error> {
    let phys = PhysLayer::open_serial(
        &args.serial.port,
        SerialSettings::with_baud_rate(args.serial.baud),
    )?;
    let mut config = SimulatorConfig::new(args.serial.id);
    if args.no_drift {
        config = config.without_drift();
    }
    let simulator = spawn_simulator(phys, config, RegisterSpace::pcba_fixture().into_shared());

    let mut status = tokio::time::interval(Duration::from_secs(args.status_period.max(1)));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = status.tick() => {
                let snapshot = simulator.snapshot();
                if !snapshot.running {
                    tracing::warn!("simulator stopped");
                    break;
                }
                tracing::info!(
                    "rx: {} tx: {} errors: {} | 3V3: {} mV 5V: {} mV | {:.1} C",
                    snapshot.stats.messages_received,
                    snapshot.stats.messages_sent,
                    snapshot.stats.errors,
                    snapshot.fixture.rail_3v3,
                    snapshot.fixture.rail_5v,
                    snapshot.fixture.ambient_temperature
                );
            }
        }
    }

    simulator.shutdown().await;
    Ok(())
}

fn print_result(result: &ModbusTestResult) {
    println!("{result}");
    match &result.values {
        Some(ResponseValues::Bits(values)) => {
            for x in values {
                println!("index: {} value: {}", x.index, x.value)
            }
        }
        Some(ResponseValues::Registers(values)) => {
            for x in values {
                println!("index: {} value: {}", x.index, x.value)
            }
        }
        Some(ResponseValues::Written(x)) => println!("index: {} value: {}", x.index, x.value),
        None => {}
    }
}

fn check(result: ModbusTestResult) -> Result<(), Error> {
    print_result(&result);
    match (result.success, result.error_message) {
        (false, Some(msg)) => Err(Error::Request(msg)),
        _ => Ok(()),
    }
}

async fn client(args: ClientArgs) -> Result<(), Error> {
    let config =
        ClientConfig::new(args.serial.id).with_timeout(Duration::from_millis(args.timeout));
    let mut client = TestClient::serial(
        &args.serial.port,
        SerialSettings::with_baud_rate(args.serial.baud),
        config,
    );
    client.connect()?;

    let outcome = match args.request {
        Request::ReadCoils(x) => check(client.read_coils(x.start, x.quantity).await),
        Request::ReadDiscreteInputs(x) => {
            check(client.read_discrete_inputs(x.start, x.quantity).await)
        }
        Request::ReadHoldingRegisters(x) => {
            check(client.read_holding_registers(x.start, x.quantity).await)
        }
        Request::ReadInputRegisters(x) => {
            check(client.read_input_registers(x.start, x.quantity).await)
        }
        Request::WriteSingleCoil(x) => {
            let value = if x.value { 0xFF00 } else { 0x0000 };
            check(client.write_single_coil(x.index, value).await)
        }
        Request::WriteSingleRegister(x) => {
            check(client.write_single_register(x.index, x.value).await)
        }
        Request::Suite => {
            let report = client.run_comprehensive_test_suite().await;
            for test in &report.tests {
                println!("{:<22} {}", test.name, test.result);
            }
            for (name, value) in &report.readings {
                println!("{name:<22} {value}");
            }
            println!(
                "{}/{} passed ({:.1}%) in {:.2} s",
                report.summary.passed,
                report.summary.total,
                report.summary.success_rate,
                report.summary.duration.as_secs_f64()
            );
            Ok(())
        }
        Request::Performance(x) => {
            let report = client.run_performance_test(x.reads, x.cycles).await;
            println!(
                "rapid reads: {:.1}% | cycles: {:.1}% | {}/{} passed | avg read {} us",
                report.rapid_read_success_rate,
                report.cycle_success_rate,
                report.passed_tests,
                report.total_tests,
                report.avg_read_duration.as_micros()
            );
            Ok(())
        }
        Request::Stress(x) => {
            let report = client
                .run_stress_test(
                    Duration::from_secs(x.duration),
                    Duration::from_millis(x.interval),
                )
                .await;
            println!(
                "{}/{} passed | error rate {:.1}% | {:.1} reads/s",
                report.passed_tests, report.total_tests, report.error_rate, report.reads_per_second
            );
            Ok(())
        }
    };

    client.disconnect();
    outcome
}

fn parse_points(points: &str, tolerance: f64) -> Result<Vec<SweepPoint>, Error> {
    points
        .split(',')
        .map(|x| {
            let volts = x
                .trim()
                .parse::<f64>()
                .map_err(|_| Error::BadSweepPoint(x.to_string()))?;
            Ok(SweepPoint::new(volts, Limits::around(volts, tolerance)))
        })
        .collect()
}

async fn demo(args: DemoArgs) -> Result<(), Error> {
    let points = parse_points(&args.points, args.tolerance)?;
    let registers = RegisterSpace::pcba_fixture().into_shared();

    // PLC simulator and Modbus client over an in-process loopback
    let (client_phys, server_phys) = benchbus::loopback_pair();
    let simulator = spawn_simulator(server_phys, SimulatorConfig::new(1), registers.clone());
    let mut client = TestClient::loopback(client_phys, ClientConfig::new(1));
    client.connect()?;

    let report = client.run_comprehensive_test_suite().await;
    for test in &report.tests {
        println!("{:<22} {}", test.name, test.result);
    }
    println!(
        "suite: {}/{} passed ({:.1}%)",
        report.summary.passed, report.summary.total, report.summary.success_rate
    );

    // put the meter across the supply output
    check(
        client
            .write_single_register(map::holding::DMM_PROBE, PROBE_PSU_OUTPUT)
            .await,
    )?;

    // SCPI bench instrument backed by the same registers
    let instrument =
        spawn_bench_instrument(SocketAddr::from(([127, 0, 0, 1], 0)), registers.clone()).await?;
    let addr = instrument.local_addr();
    let host = addr.ip().to_string();
    let manager = HardwareManager::from_configs(&[
        EquipmentConfig::new(
            "dmm",
            EquipmentKind::Multimeter,
            ConnectionConfig::tcp(&host, addr.port()),
        ),
        EquipmentConfig::new(
            "psu",
            EquipmentKind::PowerSupply,
            ConnectionConfig::tcp(&host, addr.port()),
        ),
    ])?;
    for (name, connected) in manager.connect_all().await {
        println!("{name}: {}", if connected { "connected" } else { "FAILED" });
    }

    let manager = std::sync::Arc::new(manager);
    let mut engine = TestExecutionEngine::new(manager.clone());
    engine.set_progress_callback(|percent, name| println!("[{percent:5.1}%] {name}"));
    engine.set_step_callback(|step| {
        if let Some(err) = step.error_message() {
            println!("    {} {}: {}", step.name, step.status(), err);
        }
        for m in step.measurements() {
            println!("    {m}");
        }
    });

    let sequence = engine
        .execute(voltage_sweep_sequence("Voltage sweep", &points))?
        .wait()
        .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&sequence.to_summary())?);
    } else {
        println!(
            "{}: {}/{} completed, {} failed",
            sequence.name,
            sequence.completed_steps(),
            sequence.total_steps(),
            sequence.failed_steps()
        );
    }

    manager.disconnect_all().await;
    instrument.shutdown().await;
    client.disconnect();
    simulator.shutdown().await;
    Ok(())
}
