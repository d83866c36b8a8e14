use std::time::Duration;

use crate::server::registers::{map, RegisterSpace, SharedRegisters};
use crate::types::Indexed;

const BASE_RAILS: [(u16, u16); 5] = [
    (map::input::RAIL_3V3, 3300),
    (map::input::RAIL_5V, 5000),
    (map::input::RAIL_1V2, 1200),
    (map::input::REF_2V5, 2500),
    (map::input::RAIL_1V8, 1800),
];
const BASE_CURRENT: i32 = 150;
const BASE_AMBIENT: u64 = 250;

/// ticks in one rail ripple period
const RAIL_PERIOD: u64 = 10;
/// ticks in one current swing period
const CURRENT_PERIOD: u64 = 20;
/// ticks in one ambient temperature ramp
const AMBIENT_PERIOD: u64 = 60;
/// ticks between "test in progress" toggles
const TOGGLE_PERIOD: u64 = 10;

/// Perturb the fixture points for drift tick `tick`
///
/// Rails ripple within ±1% of nominal, total current swings ±10 mA, ambient
/// temperature ramps by up to one degree, and "test in progress" toggles.
pub(crate) fn apply(space: &mut RegisterSpace, tick: u64) {
    // position within each cycle, in [-0.5, 0.5)
    let phase = |period: u64| 0.5 - (tick % period) as f64 / period as f64;

    for (address, base) in BASE_RAILS {
        let variation = (f64::from(base) * 0.02 * phase(RAIL_PERIOD)) as i32;
        set_input(space, address, i32::from(base) + variation);
    }

    let current = BASE_CURRENT + (20.0 * phase(CURRENT_PERIOD)) as i32;
    set_input(space, map::input::CURRENT_TOTAL, current);

    let ambient = BASE_AMBIENT + (10 * (tick % AMBIENT_PERIOD)) / AMBIENT_PERIOD;
    set_input(space, map::input::TEMP_AMBIENT, ambient as i32);

    if tick > 0 && tick % TOGGLE_PERIOD == 0 {
        // a space too small for the coil skips the toggle
        if let Some(value) = space.coil(map::coil::TEST_IN_PROGRESS) {
            if let Err(err) = space.write_coil(Indexed::new(map::coil::TEST_IN_PROGRESS, !value)) {
                tracing::warn!("unable to toggle the test-in-progress coil: {}", err);
            }
        }
    }
}

fn set_input(space: &mut RegisterSpace, address: u16, value: i32) {
    let value = value.clamp(0, u16::MAX as i32) as u16;
    if space.set_input_register(Indexed::new(address, value)).is_err() {
        tracing::debug!("drift point {} outside the register space", address);
    }
}

pub(crate) async fn run(
    registers: SharedRegisters,
    period: Duration,
    mut shutdown: tokio::sync::mpsc::Receiver<()>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // the first tick completes immediately, skip it so the seed values are visible for one period
    interval.tick().await;

    let mut tick: u64 = 0;
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!("drift loop shutdown");
                return;
            }
            _ = interval.tick() => {
                tick = tick.wrapping_add(1);
                apply(&mut registers.lock(), tick);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AddressRange;

    #[test]
    fn rails_stay_within_two_percent() {
        let mut space = RegisterSpace::pcba_fixture();
        for tick in 0..100 {
            apply(&mut space, tick);
            let rails = space.read_input_registers(AddressRange::new(0, 5)).unwrap();
            for (value, (_, base)) in rails.iter().zip(BASE_RAILS) {
                let delta = (i32::from(*value) - i32::from(base)).abs();
                assert!(delta <= i32::from(base) / 50, "tick {tick}: {value} vs {base}");
            }
        }
    }

    #[test]
    fn ambient_temperature_ramps() {
        let mut space = RegisterSpace::pcba_fixture();
        apply(&mut space, 0);
        assert_eq!(space.input_register(map::input::TEMP_AMBIENT), Some(250));
        apply(&mut space, 59);
        assert_eq!(space.input_register(map::input::TEMP_AMBIENT), Some(259));
    }

    #[test]
    fn toggles_test_in_progress_every_ten_ticks() {
        let mut space = RegisterSpace::pcba_fixture();
        for tick in 1..10 {
            apply(&mut space, tick);
        }
        assert_eq!(space.coil(map::coil::TEST_IN_PROGRESS), Some(false));
        apply(&mut space, 10);
        assert_eq!(space.coil(map::coil::TEST_IN_PROGRESS), Some(true));
        apply(&mut space, 20);
        assert_eq!(space.coil(map::coil::TEST_IN_PROGRESS), Some(false));
    }

    #[test]
    fn tolerates_small_spaces() {
        let mut space = RegisterSpace::new(4);
        apply(&mut space, 10);
        assert_eq!(space.input_register(0), Some(3333));
        assert_eq!(space.coil(map::coil::TEST_IN_PROGRESS), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn loop_perturbs_shared_registers() {
        let registers = RegisterSpace::pcba_fixture().into_shared();
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let task = tokio::spawn(run(registers.clone(), Duration::from_secs(1), rx));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        // tick 1 puts the 3.3 V rail at 3300 + 66 * 0.4
        assert_eq!(registers.lock().input_register(0), Some(3326));

        drop(tx);
        task.await.unwrap();
    }
}
