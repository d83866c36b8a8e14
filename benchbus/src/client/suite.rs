use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::client::{ModbusTestResult, TestClient};
use crate::server::map;

/// Pass/fail totals of a batch of exchanges
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize))]
pub struct SuiteSummary {
    /// number of exchanges
    pub total: usize,
    /// exchanges that succeeded
    pub passed: usize,
    /// exchanges that failed
    pub failed: usize,
    /// passed / total as a percentage, 0 for an empty batch
    pub success_rate: f64,
    /// wall time of the batch
    pub duration: Duration,
}

impl SuiteSummary {
    fn from_outcomes(outcomes: impl IntoIterator<Item = bool>, duration: Duration) -> Self {
        let (mut total, mut passed) = (0, 0);
        for success in outcomes {
            total += 1;
            if success {
                passed += 1;
            }
        }
        Self {
            total,
            passed,
            failed: total - passed,
            success_rate: percentage(passed, total),
            duration,
        }
    }
}

fn percentage(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 * 100.0 / total as f64
    }
}

/// One named exchange of the comprehensive suite
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize))]
pub struct SuiteTest {
    /// what the exchange checks
    pub name: &'static str,
    /// outcome
    pub result: ModbusTestResult,
}

/// Results of [`TestClient::run_comprehensive_test_suite`]
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize))]
pub struct SuiteReport {
    /// wall-clock start of the suite
    pub start_time: DateTime<Utc>,
    /// exchanges in the order they ran
    pub tests: Vec<SuiteTest>,
    /// fixture readings decoded from the successful reads, in engineering units
    pub readings: BTreeMap<&'static str, f64>,
    /// totals
    pub summary: SuiteSummary,
}

impl SuiteReport {
    /// look up an exchange by name
    pub fn test(&self, name: &str) -> Option<&ModbusTestResult> {
        self.tests.iter().find(|x| x.name == name).map(|x| &x.result)
    }
}

/// Results of [`TestClient::run_performance_test`]
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize))]
pub struct PerformanceReport {
    /// rapid back-to-back reads attempted
    pub rapid_reads: usize,
    /// write-then-read cycles attempted
    pub cycles: usize,
    /// rapid reads plus cycles
    pub total_tests: usize,
    /// successful rapid reads plus cycles where both halves succeeded
    pub passed_tests: usize,
    /// percentage of rapid reads that succeeded
    pub rapid_read_success_rate: f64,
    /// percentage of cycles where the write succeeded and the read returned the written value
    pub cycle_success_rate: f64,
    /// mean duration of the successful rapid reads
    pub avg_read_duration: Duration,
}

/// Results of [`TestClient::run_stress_test`]
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize))]
pub struct StressReport {
    /// reads attempted
    pub total_tests: usize,
    /// reads that succeeded
    pub passed_tests: usize,
    /// percentage of reads that failed
    pub error_rate: f64,
    /// reads attempted per second of test time
    pub reads_per_second: f64,
    /// length of the test
    pub duration: Duration,
}

/// register written and read back by the performance cycles
const CYCLE_REGISTER: u16 = map::holding::SEQUENCE_STEP;

impl TestClient {
    /// Run the scripted PCBA suite: rail voltages, currents, temperatures,
    /// status coils and control registers, then switch the test mode to
    /// manual and read it back
    pub async fn run_comprehensive_test_suite(&mut self) -> SuiteReport {
        let start_time = Utc::now();
        let start = Instant::now();
        tracing::info!("starting comprehensive PCBA test suite");

        let mut tests = Vec::new();
        let mut readings = BTreeMap::new();

        let voltages = self.read_input_registers(map::input::RAIL_3V3, 5).await;
        if let Some(values) = &voltages.values {
            for (name, address) in [
                ("3V3_rail_mV", map::input::RAIL_3V3),
                ("5V_rail_mV", map::input::RAIL_5V),
                ("1V2_rail_mV", map::input::RAIL_1V2),
                ("2V5_ref_mV", map::input::REF_2V5),
                ("1V8_rail_mV", map::input::RAIL_1V8),
            ] {
                if let Some(x) = values.register(address) {
                    readings.insert(name, f64::from(x));
                }
            }
        }
        tests.push(SuiteTest {
            name: "voltage_readings",
            result: voltages,
        });

        let currents = self.read_input_registers(map::input::CURRENT_TOTAL, 3).await;
        if let Some(values) = &currents.values {
            for (name, address) in [
                ("total_current_mA", map::input::CURRENT_TOTAL),
                ("digital_current_mA", map::input::CURRENT_DIGITAL),
                ("analog_current_mA", map::input::CURRENT_ANALOG),
            ] {
                if let Some(x) = values.register(address) {
                    readings.insert(name, f64::from(x));
                }
            }
        }
        tests.push(SuiteTest {
            name: "current_readings",
            result: currents,
        });

        let temperatures = self.read_input_registers(map::input::TEMP_AMBIENT, 2).await;
        if let Some(values) = &temperatures.values {
            for (name, address) in [
                ("ambient_temp_C", map::input::TEMP_AMBIENT),
                ("hotspot_temp_C", map::input::TEMP_HOTSPOT),
            ] {
                if let Some(x) = values.register(address) {
                    readings.insert(name, f64::from(x) / 10.0);
                }
            }
        }
        tests.push(SuiteTest {
            name: "temperature_readings",
            result: temperatures,
        });

        let status = self.read_coils(map::coil::SYSTEM_READY, 4).await;
        if let Some(values) = &status.values {
            for (name, address) in [
                ("system_ready", map::coil::SYSTEM_READY),
                ("test_in_progress", map::coil::TEST_IN_PROGRESS),
                ("power_good", map::coil::POWER_GOOD),
                ("alarm_active", map::coil::ALARM),
            ] {
                if let Some(x) = values.bit(address) {
                    readings.insert(name, if x { 1.0 } else { 0.0 });
                }
            }
        }
        tests.push(SuiteTest {
            name: "system_status",
            result: status,
        });

        let control = self.read_holding_registers(map::holding::TEST_MODE, 3).await;
        tests.push(SuiteTest {
            name: "control_registers",
            result: control,
        });

        // manual mode
        let write = self.write_single_register(map::holding::TEST_MODE, 2).await;
        tests.push(SuiteTest {
            name: "write_test_mode",
            result: write,
        });

        let verify = self.read_holding_registers(map::holding::TEST_MODE, 1).await;
        tests.push(SuiteTest {
            name: "verify_write",
            result: verify,
        });

        let summary =
            SuiteSummary::from_outcomes(tests.iter().map(|x| x.result.success), start.elapsed());
        tracing::info!(
            "suite finished: {}/{} passed ({:.1}%) in {:.2} s",
            summary.passed,
            summary.total,
            summary.success_rate,
            summary.duration.as_secs_f64()
        );

        SuiteReport {
            start_time,
            tests,
            readings,
            summary,
        }
    }

    /// `reads` back-to-back reads of the rail block, then `cycles` write/read-back cycles
    pub async fn run_performance_test(&mut self, reads: usize, cycles: usize) -> PerformanceReport {
        let mut rapid_successes = 0;
        let mut read_time = Duration::ZERO;
        for _ in 0..reads {
            let result = self.read_input_registers(map::input::RAIL_3V3, 5).await;
            if result.success {
                rapid_successes += 1;
                read_time += result.duration;
            }
        }

        let mut cycle_successes = 0;
        for i in 0..cycles {
            let value = (i % (u16::MAX as usize + 1)) as u16;
            let write = self.write_single_register(CYCLE_REGISTER, value).await;
            let read = self.read_holding_registers(CYCLE_REGISTER, 1).await;
            let read_back = read
                .values
                .as_ref()
                .and_then(|x| x.register(CYCLE_REGISTER));
            if write.success && read.success && read_back == Some(value) {
                cycle_successes += 1;
            }
        }

        let avg_read_duration = match u32::try_from(rapid_successes) {
            Ok(count) if count > 0 => read_time / count,
            _ => Duration::ZERO,
        };

        PerformanceReport {
            rapid_reads: reads,
            cycles,
            total_tests: reads + cycles,
            passed_tests: rapid_successes + cycle_successes,
            rapid_read_success_rate: percentage(rapid_successes, reads),
            cycle_success_rate: percentage(cycle_successes, cycles),
            avg_read_duration,
        }
    }

    /// single-register reads every `interval` until `duration` has elapsed
    pub async fn run_stress_test(&mut self, duration: Duration, interval: Duration) -> StressReport {
        tracing::info!("running {} s continuous read test", duration.as_secs_f64());
        let start = Instant::now();
        let (mut total, mut passed) = (0, 0);

        while start.elapsed() < duration {
            let result = self.read_input_registers(map::input::RAIL_3V3, 1).await;
            total += 1;
            if result.success {
                passed += 1;
            }
            tokio::time::sleep(interval).await;
        }

        let seconds = duration.as_secs_f64();
        StressReport {
            total_tests: total,
            passed_tests: passed,
            error_rate: percentage(total - passed, total),
            reads_per_second: if seconds > 0.0 {
                total as f64 / seconds
            } else {
                0.0
            },
            duration,
        }
    }
}
