use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use benchbus::client::*;
use benchbus::hal::*;
use benchbus::sequence::*;
use benchbus::server::*;
use benchbus::*;

use tokio::runtime::Runtime;

fn start_simulator() -> (SimulatorHandle, TestClient) {
    let (client_phys, server_phys) = loopback_pair();
    let simulator = spawn_simulator(
        server_phys,
        SimulatorConfig::new(1).without_drift(),
        RegisterSpace::pcba_fixture().into_shared(),
    );
    let mut client = TestClient::loopback(
        client_phys,
        ClientConfig::new(1).with_timeout(Duration::from_millis(500)),
    );
    client.connect().unwrap();
    (simulator, client)
}

async fn test_requests_and_responses() {
    let (simulator, mut client) = start_simulator();

    let result = client.read_input_registers(0, 5).await;
    assert!(result.success, "{result}");
    assert_eq!(
        result.values.unwrap().register_values(),
        vec![3300, 5000, 1200, 2500, 1800]
    );

    let result = client.read_coils(0, 4).await;
    assert_eq!(
        result.values.unwrap().bit_values(),
        vec![true, false, true, false]
    );

    // do a single coil write and verify that it was written by reading it
    assert!(client.write_single_coil(5, 0xFF00).await.success);
    assert_eq!(
        client.read_coils(5, 1).await.values.unwrap().bit(5),
        Some(true)
    );
    assert!(client.write_single_coil(5, 0x0000).await.success);
    assert_eq!(
        client.read_coils(5, 1).await.values.unwrap().bit(5),
        Some(false)
    );

    // anything but ON or OFF is refused and leaves the coil alone
    let result = client.write_single_coil(5, 0x1234).await;
    assert!(!result.success);
    assert_eq!(result.exception, Some(ExceptionCode::IllegalDataValue));
    assert_eq!(simulator.registers().lock().coil(5), Some(false));

    // do a single register write and verify that it was written by reading it
    let result = client.write_single_register(1, 0xABCD).await;
    assert_eq!(
        result.values,
        Some(ResponseValues::Written(Indexed::new(1, 0xABCD)))
    );
    assert_eq!(
        client
            .read_holding_registers(1, 1)
            .await
            .values
            .unwrap()
            .register(1),
        Some(0xABCD)
    );

    // range running past the end of the table
    let result = client.read_holding_registers(995, 10).await;
    assert!(!result.success);
    assert_eq!(result.exception, Some(ExceptionCode::IllegalDataAddress));

    assert_eq!(client.results().len(), 10);
    let stats = simulator.stats();
    assert_eq!(stats.messages_received, 10);
    assert_eq!(stats.messages_sent, 10);
    assert_eq!(stats.errors, 0);

    client.disconnect();
    simulator.shutdown().await;
}

#[test]
fn can_read_and_write_values() {
    let rt = Runtime::new().unwrap();
    rt.block_on(test_requests_and_responses())
}

#[tokio::test]
async fn comprehensive_suite_passes_against_the_fixture() {
    let (simulator, mut client) = start_simulator();

    let report = client.run_comprehensive_test_suite().await;
    assert_eq!(report.summary.failed, 0, "{:?}", report.tests);
    assert_eq!(report.summary.success_rate, 100.0);
    assert_eq!(report.readings.get("3V3_rail_mV"), Some(&3300.0));

    client.disconnect();
    simulator.shutdown().await;
}

struct Bench {
    simulator: SimulatorHandle,
    client: TestClient,
    instrument: InstrumentHandle,
    manager: Arc<HardwareManager>,
}

impl Bench {
    async fn start() -> Self {
        let (simulator, mut client) = start_simulator();

        // meter across the supply output
        let result = client
            .write_single_register(map::holding::DMM_PROBE, PROBE_PSU_OUTPUT)
            .await;
        assert!(result.success, "{result}");

        let instrument =
            spawn_bench_instrument(SocketAddr::from(([127, 0, 0, 1], 0)), simulator.registers())
                .await
                .unwrap();
        let addr = instrument.local_addr();
        let connection = ConnectionConfig::tcp(&addr.ip().to_string(), addr.port());
        let manager = HardwareManager::from_configs(&[
            EquipmentConfig::new("dmm", EquipmentKind::Multimeter, connection.clone()),
            EquipmentConfig::new("psu", EquipmentKind::PowerSupply, connection),
        ])
        .unwrap();

        let connected = manager.connect_all().await;
        assert!(connected.values().all(|x| *x), "{connected:?}");

        Self {
            simulator,
            client,
            instrument,
            manager: Arc::new(manager),
        }
    }

    async fn stop(mut self) {
        self.manager.disconnect_all().await;
        self.instrument.shutdown().await;
        self.client.disconnect();
        self.simulator.shutdown().await;
    }
}

#[tokio::test]
async fn voltage_sweep_runs_against_the_bench_instrument() {
    let bench = Bench::start().await;

    let engine = TestExecutionEngine::new(bench.manager.clone());
    let sequence = voltage_sweep_sequence(
        "sweep",
        &[
            SweepPoint::new(3.3, Limits::new(3.25, 3.35)),
            SweepPoint::new(5.0, Limits::new(4.95, 5.05)),
            // deliberately outside the window
            SweepPoint::new(12.0, Limits::new(11.0, 11.5)),
        ],
    );
    let sequence = engine.execute(sequence).unwrap().wait().await.unwrap();

    assert_eq!(sequence.total_steps(), 11);
    assert_eq!(sequence.failed_steps(), 1);
    assert_eq!(sequence.completed_steps(), 10);

    let failed: Vec<&str> = sequence
        .steps()
        .iter()
        .filter(|x| x.status() == StepStatus::Failed)
        .map(|x| x.name.as_str())
        .collect();
    assert_eq!(failed, vec!["Measure Voltage 12V"]);

    let readings: Vec<f64> = sequence
        .steps()
        .iter()
        .flat_map(|x| x.measurements())
        .map(|x| x.value)
        .collect();
    assert_eq!(readings, vec![3.3, 5.0, 12.0]);

    // the cleanup step returned after `*OPC?`, so the output is already off
    let psu = bench.manager.get("psu").unwrap();
    match &*psu.lock().await {
        Equipment::PowerSupply(x) => assert!(!x.output_enabled()),
        other => panic!("unexpected equipment: {}", other.name()),
    }
    assert_eq!(
        bench.simulator.registers().lock().coil(map::coil::PSU_OUTPUT),
        Some(false)
    );

    bench.stop().await;
}

#[tokio::test]
async fn cancelling_from_the_progress_callback_skips_the_rest() {
    let bench = Bench::start().await;

    let mut engine = TestExecutionEngine::new(bench.manager.clone());
    let slot = Arc::new(OnceLock::<CancelToken>::new());
    let token = slot.clone();
    engine.set_progress_callback(move |_, _| {
        if let Some(token) = token.get() {
            token.cancel();
        }
    });

    let sequence = voltage_sweep_sequence("sweep", &[SweepPoint::new(3.3, Limits::NONE)]);
    let handle = engine.execute(sequence).unwrap();
    slot.set(handle.cancel_token()).unwrap();
    let sequence = handle.wait().await.unwrap();

    let statuses: Vec<StepStatus> = sequence.steps().iter().map(|x| x.status()).collect();
    assert_eq!(statuses[0], StepStatus::Completed);
    assert!(statuses[1..].iter().all(|x| *x == StepStatus::Skipped));
    assert_eq!(sequence.completed_steps(), 1);
    assert!(sequence.end_time().is_some());
    assert!(!engine.is_running());

    bench.stop().await;
}

#[tokio::test]
async fn offline_equipment_fails_steps_without_aborting() {
    let manager = HardwareManager::from_configs(&[EquipmentConfig::new(
        "psu",
        EquipmentKind::PowerSupply,
        ConnectionConfig::tcp("127.0.0.1", 1),
    )])
    .unwrap();

    let engine = TestExecutionEngine::new(Arc::new(manager));
    let sequence = TestSequenceBuilder::new("offline", "no hardware attached")
        .add_setup_step("Enable", "psu", StepAction::EnableOutput { on: true })
        .add_measurement_step(
            "Read",
            "dmm",
            StepAction::MeasureVoltageDc { range: None },
            Limits::NONE,
        )
        .build();
    let sequence = engine.execute(sequence).unwrap().wait().await.unwrap();

    assert_eq!(sequence.failed_steps(), 2);
    assert_eq!(
        sequence.steps()[0].error_message(),
        Some("equipment not connected: psu")
    );
    assert_eq!(
        sequence.steps()[1].error_message(),
        Some("equipment not found: dmm")
    );
}
